//! # Key-Backend Dispatcher
//!
//! Routes a decryption request to the key backends able to serve it.
//!
//! The envelope declares master keys ([`MasterKey`]); the session supplies
//! credential slots ([`KeyBackend`]). [`KeyService::decrypt`] intersects the
//! two by [`KeyKind`] and hands the engine only the credentials of the
//! backends that matched.

use crate::crd::sops::SopsMetadata;
use crate::decryptor::engine::{DocumentFormat, SopsEngine};
use crate::decryptor::error::DecryptError;
use crate::decryptor::keys::{AwsCredentials, AzureCredentials, Sensitive};
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Key type of a master key or backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
    Pgp,
    Age,
    Vault,
    AwsKms,
    AzureKeyVault,
    GcpKms,
}

impl KeyKind {
    /// Name of the key list in the sops envelope
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyKind::Pgp => "pgp",
            KeyKind::Age => "age",
            KeyKind::Vault => "hc_vault",
            KeyKind::AwsKms => "aws_kms",
            KeyKind::AzureKeyVault => "azure_kv",
            KeyKind::GcpKms => "gcp_kms",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Master key declared in a sops envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterKey {
    Pgp {
        fingerprint: String,
    },
    Age {
        recipient: String,
    },
    Vault {
        address: String,
        engine_path: String,
        key_name: String,
    },
    AwsKms {
        arn: String,
        role: Option<String>,
        context: Vec<(String, String)>,
    },
    AzureKeyVault {
        vault_url: String,
        name: String,
        version: String,
    },
    GcpKms {
        resource_id: String,
    },
}

impl MasterKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            MasterKey::Pgp { .. } => KeyKind::Pgp,
            MasterKey::Age { .. } => KeyKind::Age,
            MasterKey::Vault { .. } => KeyKind::Vault,
            MasterKey::AwsKms { .. } => KeyKind::AwsKms,
            MasterKey::AzureKeyVault { .. } => KeyKind::AzureKeyVault,
            MasterKey::GcpKms { .. } => KeyKind::GcpKms,
        }
    }

    /// Every master key of the envelope, across all key groups
    pub fn from_envelope(envelope: &SopsMetadata) -> Vec<MasterKey> {
        let mut keys = Vec::new();
        for group in envelope.groups() {
            keys.extend(group.pgp.iter().map(|k| MasterKey::Pgp {
                fingerprint: k.fp.clone(),
            }));
            keys.extend(group.age.iter().map(|k| MasterKey::Age {
                recipient: k.recipient.clone(),
            }));
            keys.extend(group.hc_vault.iter().map(|k| MasterKey::Vault {
                address: k.vault_address.clone(),
                engine_path: k.engine_path.clone(),
                key_name: k.key_name.clone(),
            }));
            keys.extend(group.kms.iter().map(|k| MasterKey::AwsKms {
                arn: k.arn.clone(),
                role: k.role.clone(),
                context: k
                    .context
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            }));
            keys.extend(group.azure_kv.iter().map(|k| MasterKey::AzureKeyVault {
                vault_url: k.vault_url.clone(),
                name: k.name.clone(),
                version: k.version.clone(),
            }));
            keys.extend(group.gcp_kms.iter().map(|k| MasterKey::GcpKms {
                resource_id: k.resource_id.clone(),
            }));
        }
        keys
    }
}

/// Credential slot of one key backend
#[derive(Debug, Clone)]
pub enum KeyBackend {
    /// GnuPG home holding the imported private keys
    Pgp { keyring: PathBuf },
    Age { identities: Vec<Sensitive> },
    Vault { token: Sensitive },
    AwsKms { credentials: AwsCredentials },
    AzureKeyVault { credentials: AzureCredentials },
    GcpKms { credentials: Sensitive },
}

impl KeyBackend {
    pub fn kind(&self) -> KeyKind {
        match self {
            KeyBackend::Pgp { .. } => KeyKind::Pgp,
            KeyBackend::Age { .. } => KeyKind::Age,
            KeyBackend::Vault { .. } => KeyKind::Vault,
            KeyBackend::AwsKms { .. } => KeyKind::AwsKms,
            KeyBackend::AzureKeyVault { .. } => KeyKind::AzureKeyVault,
            KeyBackend::GcpKms { .. } => KeyKind::GcpKms,
        }
    }

    fn export(&self, credentials: &mut EngineCredentials) {
        match self {
            KeyBackend::Pgp { keyring } => {
                credentials.set("GNUPGHOME", keyring.to_string_lossy());
            }
            KeyBackend::Age { identities } => {
                let joined = identities
                    .iter()
                    .map(Sensitive::expose)
                    .collect::<Vec<_>>()
                    .join("\n");
                credentials.set("SOPS_AGE_KEY", joined);
            }
            KeyBackend::Vault { token } => credentials.set("VAULT_TOKEN", token.expose()),
            KeyBackend::AwsKms { credentials: aws } => {
                credentials.set("AWS_ACCESS_KEY_ID", aws.access_key_id.as_str());
                credentials.set("AWS_SECRET_ACCESS_KEY", aws.secret_access_key.as_str());
                if let Some(token) = &aws.session_token {
                    credentials.set("AWS_SESSION_TOKEN", token.as_str());
                }
            }
            KeyBackend::AzureKeyVault { credentials: azure } => {
                credentials.set("AZURE_TENANT_ID", azure.tenant_id.as_str());
                credentials.set("AZURE_CLIENT_ID", azure.client_id.as_str());
                credentials.set("AZURE_CLIENT_SECRET", azure.client_secret.as_str());
                if let Some(host) = &azure.authority_host {
                    credentials.set("AZURE_AUTHORITY_HOST", host.as_str());
                }
            }
            KeyBackend::GcpKms { credentials: gcp } => {
                credentials.set("GOOGLE_CREDENTIALS", gcp.expose());
            }
        }
    }
}

/// Environment handed to the decryption engine; values are zeroized on drop
#[derive(Debug, Default, Clone)]
pub struct EngineCredentials {
    vars: Vec<(&'static str, Sensitive)>,
}

impl EngineCredentials {
    fn set(&mut self, name: &'static str, value: impl Into<String>) {
        self.vars.retain(|(existing, _)| *existing != name);
        self.vars.push((name, Sensitive::new(value)));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, value)| value.expose())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.vars.iter().map(|(name, value)| (*name, value.expose()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Accumulates credential slots; repeated age identities are appended,
/// every other slot keeps the last value set.
#[derive(Debug, Default, Clone)]
pub struct KeyServiceBuilder {
    keyring: Option<PathBuf>,
    age_identities: Vec<Sensitive>,
    vault_token: Option<Sensitive>,
    aws_credentials: Option<AwsCredentials>,
    azure_credentials: Option<AzureCredentials>,
    gcp_credentials: Option<Sensitive>,
}

impl KeyServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyring(mut self, keyring: PathBuf) -> Self {
        self.keyring = Some(keyring);
        self
    }

    pub fn with_age_identities(mut self, identities: Vec<Sensitive>) -> Self {
        self.age_identities.extend(identities);
        self
    }

    pub fn with_vault_token(mut self, token: Sensitive) -> Self {
        self.vault_token = Some(token);
        self
    }

    pub fn with_aws_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.aws_credentials = Some(credentials);
        self
    }

    pub fn with_azure_credentials(mut self, credentials: AzureCredentials) -> Self {
        self.azure_credentials = Some(credentials);
        self
    }

    pub fn with_gcp_credentials(mut self, credentials: Sensitive) -> Self {
        self.gcp_credentials = Some(credentials);
        self
    }

    pub fn build(self) -> KeyService {
        let mut backends = Vec::new();
        if let Some(keyring) = self.keyring {
            backends.push(KeyBackend::Pgp { keyring });
        }
        if !self.age_identities.is_empty() {
            backends.push(KeyBackend::Age {
                identities: self.age_identities,
            });
        }
        if let Some(token) = self.vault_token {
            backends.push(KeyBackend::Vault { token });
        }
        if let Some(credentials) = self.aws_credentials {
            backends.push(KeyBackend::AwsKms { credentials });
        }
        if let Some(credentials) = self.azure_credentials {
            backends.push(KeyBackend::AzureKeyVault { credentials });
        }
        if let Some(credentials) = self.gcp_credentials {
            backends.push(KeyBackend::GcpKms { credentials });
        }
        KeyService { backends }
    }
}

/// Configured key backends of one session
#[derive(Debug, Default)]
pub struct KeyService {
    backends: Vec<KeyBackend>,
}

impl KeyService {
    pub fn backends(&self) -> &[KeyBackend] {
        &self.backends
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Credentials of the backends serving at least one declared master key
    pub fn select(&self, envelope: &SopsMetadata) -> Result<EngineCredentials, DecryptError> {
        let master_keys = MasterKey::from_envelope(envelope);
        if master_keys.is_empty() {
            return Err(DecryptError::NoMasterKeys);
        }

        let mut declared: Vec<KeyKind> = Vec::new();
        for key in &master_keys {
            if !declared.contains(&key.kind()) {
                declared.push(key.kind());
            }
        }

        let mut credentials = EngineCredentials::default();
        let mut selected = 0usize;
        for backend in &self.backends {
            if declared.contains(&backend.kind()) {
                backend.export(&mut credentials);
                selected += 1;
            }
        }

        if selected == 0 {
            return Err(DecryptError::NoMatchingBackend { declared });
        }
        debug!(
            "Selected {} of {} key backends for envelope declaring {:?}",
            selected,
            self.backends.len(),
            declared
        );
        Ok(credentials)
    }

    /// Decrypt a wrapped sops document with the backends its envelope needs
    pub async fn decrypt(
        &self,
        engine: &dyn SopsEngine,
        envelope: &SopsMetadata,
        document: Vec<u8>,
        format: DocumentFormat,
    ) -> Result<Vec<u8>, DecryptError> {
        let credentials = self.select(envelope)?;
        engine.decrypt(document, format, &credentials).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::sops::{AgeKey, KeyGroup, PgpKey, VaultKey};

    fn age_envelope() -> SopsMetadata {
        SopsMetadata {
            age: vec![AgeKey {
                recipient: "age1recipient".to_string(),
                enc: "-----BEGIN AGE ENCRYPTED FILE-----".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_master_keys_span_key_groups() {
        let envelope = SopsMetadata {
            key_groups: vec![
                KeyGroup {
                    pgp: vec![PgpKey {
                        fp: "ABCDEF".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
                KeyGroup {
                    hc_vault: vec![VaultKey {
                        vault_address: "https://vault:8200".to_string(),
                        engine_path: "sops".to_string(),
                        key_name: "team".to_string(),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            ],
            ..age_envelope()
        };
        let kinds: Vec<KeyKind> = MasterKey::from_envelope(&envelope)
            .iter()
            .map(MasterKey::kind)
            .collect();
        assert_eq!(kinds, vec![KeyKind::Age, KeyKind::Pgp, KeyKind::Vault]);
    }

    #[test]
    fn test_select_only_matching_backends() {
        let service = KeyServiceBuilder::new()
            .with_age_identities(vec![Sensitive::new("AGE-SECRET-KEY-1AAA")])
            .with_vault_token(Sensitive::new("hvs.token"))
            .build();
        let credentials = service.select(&age_envelope()).unwrap();
        assert_eq!(credentials.get("SOPS_AGE_KEY"), Some("AGE-SECRET-KEY-1AAA"));
        assert_eq!(credentials.get("VAULT_TOKEN"), None);
    }

    #[test]
    fn test_age_identities_accumulate() {
        let service = KeyServiceBuilder::new()
            .with_age_identities(vec![Sensitive::new("AGE-SECRET-KEY-1AAA")])
            .with_age_identities(vec![Sensitive::new("AGE-SECRET-KEY-1BBB")])
            .build();
        assert_eq!(service.backends().len(), 1);
        let credentials = service.select(&age_envelope()).unwrap();
        assert_eq!(
            credentials.get("SOPS_AGE_KEY"),
            Some("AGE-SECRET-KEY-1AAA\nAGE-SECRET-KEY-1BBB")
        );
    }

    #[test]
    fn test_no_matching_backend_names_declared_kinds() {
        let service = KeyServiceBuilder::new()
            .with_vault_token(Sensitive::new("hvs.token"))
            .build();
        match service.select(&age_envelope()) {
            Err(DecryptError::NoMatchingBackend { declared }) => {
                assert_eq!(declared, vec![KeyKind::Age]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_without_keys() {
        let service = KeyServiceBuilder::new().build();
        assert!(matches!(
            service.select(&SopsMetadata::default()),
            Err(DecryptError::NoMasterKeys)
        ));
    }
}
