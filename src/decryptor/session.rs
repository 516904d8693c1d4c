//! # Decryption Session
//!
//! Per-pass accumulator of key material plus the decrypt operation.
//!
//! A session is created for one reconciliation pass, fed the key secrets the
//! matched providers expose, and dropped at the end of the pass. Dropping it
//! removes the temporary GnuPG home and zeroizes every credential it held.

use crate::crd::{ObjectKey, SopsMetadata, SopsResource, SopsSecretItem};
use crate::decryptor::backend::{KeyService, KeyServiceBuilder};
use crate::decryptor::engine::{DocumentFormat, SopsEngine};
use crate::decryptor::error::{CredentialError, DecryptError, KeyMaterialError};
use crate::decryptor::gnupg::Keyring;
use crate::decryptor::keys::{self, EntryKind};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::FutureExt;
use k8s_openapi::api::core::v1::Secret;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroize;

const DOCUMENT_FORMAT: DocumentFormat = DocumentFormat::Json;

/// Plaintext content of one secret item
#[derive(Default, PartialEq, Eq)]
pub struct DecryptedItem {
    pub data: BTreeMap<String, Vec<u8>>,
}

impl std::fmt::Debug for DecryptedItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptedItem")
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for DecryptedItem {
    fn drop(&mut self) {
        for value in self.data.values_mut() {
            value.zeroize();
        }
    }
}

#[derive(Serialize)]
struct WrappedDocument<'a> {
    spec: WrappedSpec<'a>,
    sops: &'a SopsMetadata,
}

#[derive(Serialize)]
struct WrappedSpec<'a> {
    secrets: [&'a SopsSecretItem; 1],
}

#[derive(Deserialize)]
struct DecryptedDocument {
    spec: DecryptedSpec,
}

#[derive(Deserialize)]
struct DecryptedSpec {
    #[serde(default)]
    secrets: Vec<DecryptedEntry>,
}

#[derive(Deserialize)]
struct DecryptedEntry {
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
    #[serde(default, rename = "stringData")]
    string_data: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug)]
pub struct DecryptionSession {
    engine: Arc<dyn SopsEngine>,
    gpg_binary: Option<PathBuf>,
    keyring: Option<Keyring>,
    builder: KeyServiceBuilder,
    loaded_entries: usize,
}

impl DecryptionSession {
    pub fn new(engine: Arc<dyn SopsEngine>) -> Self {
        Self {
            engine,
            gpg_binary: None,
            keyring: None,
            builder: KeyServiceBuilder::new(),
            loaded_entries: 0,
        }
    }

    /// Use a specific `gpg` binary for PGP key imports
    pub fn with_gpg_binary(mut self, gpg_binary: Option<PathBuf>) -> Self {
        self.gpg_binary = gpg_binary;
        self
    }

    /// Number of key entries loaded so far
    pub fn loaded_entries(&self) -> usize {
        self.loaded_entries
    }

    pub fn key_service(&self) -> KeyService {
        self.builder.clone().build()
    }

    /// Load every recognised entry of a key secret.
    ///
    /// Valid entries are kept even when others fail; the error then lists
    /// the entries that could not be used.
    pub async fn add_key_material(&mut self, secret: &Secret) -> Result<usize, KeyMaterialError> {
        let key = ObjectKey::from_meta(&secret.metadata);
        let mut entries: Vec<(&str, &[u8])> = Vec::new();
        if let Some(data) = &secret.data {
            entries.extend(data.iter().map(|(name, value)| (name.as_str(), value.0.as_slice())));
        }
        if let Some(string_data) = &secret.string_data {
            entries.extend(
                string_data
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_bytes())),
            );
        }

        let mut loaded = 0usize;
        let mut errors = Vec::new();
        for (entry, raw) in entries {
            let Some(kind) = keys::classify(entry) else {
                debug!("Ignoring entry '{}' of key secret {}", entry, key);
                continue;
            };
            match self.load_entry(kind, entry, raw).await {
                Ok(()) => loaded += 1,
                Err(e) => {
                    warn!("Key secret {}: {}", key, e);
                    errors.push(e);
                }
            }
        }
        self.loaded_entries += loaded;

        if !errors.is_empty() {
            return Err(KeyMaterialError::Invalid {
                secret: key,
                errors,
            });
        }
        if loaded == 0 {
            return Err(KeyMaterialError::NoEntries { secret: key });
        }
        debug!("Loaded {} key entries from {}", loaded, key);
        Ok(loaded)
    }

    async fn load_entry(
        &mut self,
        kind: EntryKind,
        entry: &str,
        raw: &[u8],
    ) -> Result<(), CredentialError> {
        match kind {
            EntryKind::PgpKey => {
                let armored = keys::entry_text(entry, raw)?;
                let keyring = self.keyring()?;
                keyring.import(entry, armored.expose()).await?;
                debug!("Session keyring holds {} PGP keys", keyring.imported());
                Ok(())
            }
            EntryKind::AgeIdentities => {
                let identities = keys::parse_age_identities(entry, raw)?;
                self.update(|builder| builder.with_age_identities(identities));
                Ok(())
            }
            EntryKind::VaultToken => {
                let token = keys::parse_vault_token(entry, raw)?;
                self.update(|builder| builder.with_vault_token(token));
                Ok(())
            }
            EntryKind::AwsCredentials => {
                let credentials = keys::parse_aws_credentials(entry, raw)?;
                self.update(|builder| builder.with_aws_credentials(credentials));
                Ok(())
            }
            EntryKind::AzureCredentials => {
                let credentials = keys::parse_azure_credentials(entry, raw)?;
                self.update(|builder| builder.with_azure_credentials(credentials));
                Ok(())
            }
            EntryKind::GcpCredentials => {
                let credentials = keys::parse_gcp_credentials(entry, raw)?;
                self.update(|builder| builder.with_gcp_credentials(credentials));
                Ok(())
            }
        }
    }

    fn update(&mut self, apply: impl FnOnce(KeyServiceBuilder) -> KeyServiceBuilder) {
        let builder = std::mem::take(&mut self.builder);
        self.builder = apply(builder);
    }

    /// The session keyring, created on first use
    fn keyring(&mut self) -> Result<&mut Keyring, CredentialError> {
        let keyring = match self.keyring.take() {
            Some(keyring) => keyring,
            None => {
                let keyring = Keyring::create(self.gpg_binary.as_deref())?;
                let home = keyring.home().to_path_buf();
                self.update(|builder| builder.with_keyring(home));
                keyring
            }
        };
        Ok(self.keyring.insert(keyring))
    }

    /// A resource is encrypted when it carries a sops envelope
    pub fn is_encrypted<K: SopsResource>(&self, resource: &K) -> bool {
        resource.sops().is_some()
    }

    /// Decrypt one item of an encrypted resource.
    ///
    /// The item is re-wrapped with the resource's envelope into a document of
    /// its own, so the engine sees a valid sops file containing only that
    /// item.
    pub async fn decrypt(
        &self,
        envelope: &SopsMetadata,
        item: &SopsSecretItem,
    ) -> Result<DecryptedItem, DecryptError> {
        let document = serde_json::to_vec(&WrappedDocument {
            spec: WrappedSpec { secrets: [item] },
            sops: envelope,
        })
        .map_err(DecryptError::Encode)?;

        let service = self.key_service();
        let attempt = service.decrypt(self.engine.as_ref(), envelope, document, DOCUMENT_FORMAT);
        let mut plaintext = AssertUnwindSafe(attempt)
            .catch_unwind()
            .await
            .map_err(|panic| DecryptError::Panicked {
                input: DOCUMENT_FORMAT.label(),
                output: DOCUMENT_FORMAT.label(),
                message: panic_message(panic.as_ref()),
            })??;

        let parsed: Result<DecryptedDocument, _> = serde_json::from_slice(&plaintext);
        plaintext.zeroize();
        let mut document = parsed.map_err(DecryptError::Decode)?;
        if document.spec.secrets.is_empty() {
            return Err(DecryptError::MissingItem(item.name.clone()));
        }
        let entry = document.spec.secrets.swap_remove(0);
        unwrap_entry(entry)
    }
}

fn unwrap_entry(entry: DecryptedEntry) -> Result<DecryptedItem, DecryptError> {
    let mut item = DecryptedItem::default();
    for (key, value) in entry.data {
        let encoded = scalar_text(value);
        let decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|source| DecryptError::InvalidBase64 {
                key: key.clone(),
                source,
            })?;
        item.data.insert(key, decoded);
    }
    // stringData wins, as it does on the API server
    for (key, value) in entry.string_data {
        item.data.insert(key, scalar_text(value).into_bytes());
    }
    Ok(item)
}

fn scalar_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::sops::AgeKey;
    use crate::decryptor::backend::EngineCredentials;
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;

    /// Replaces every `ENC[...]` value with its payload and checks the age key
    #[derive(Debug)]
    struct EchoEngine;

    fn strip_enc(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(text) => {
                if let Some(inner) = text.strip_prefix("ENC[").and_then(|t| t.strip_suffix(']')) {
                    *text = inner.to_string();
                }
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(strip_enc),
            serde_json::Value::Object(map) => map.values_mut().for_each(strip_enc),
            _ => {}
        }
    }

    #[async_trait]
    impl SopsEngine for EchoEngine {
        async fn decrypt(
            &self,
            document: Vec<u8>,
            _format: DocumentFormat,
            credentials: &EngineCredentials,
        ) -> Result<Vec<u8>, DecryptError> {
            assert!(credentials.get("SOPS_AGE_KEY").is_some());
            let mut value: serde_json::Value = serde_json::from_slice(&document).unwrap();
            strip_enc(&mut value["spec"]);
            Ok(serde_json::to_vec(&value).unwrap())
        }
    }

    #[derive(Debug)]
    struct PanickingEngine;

    #[async_trait]
    impl SopsEngine for PanickingEngine {
        async fn decrypt(
            &self,
            _document: Vec<u8>,
            _format: DocumentFormat,
            _credentials: &EngineCredentials,
        ) -> Result<Vec<u8>, DecryptError> {
            panic!("malformed tree");
        }
    }

    fn envelope() -> SopsMetadata {
        SopsMetadata {
            age: vec![AgeKey {
                recipient: "age1recipient".to_string(),
                enc: "enc".to_string(),
            }],
            ..Default::default()
        }
    }

    fn key_secret(entries: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("keys".to_string()),
                namespace: Some("sops-system".to_string()),
                ..Default::default()
            },
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_key_material_ignores_unknown_entries() {
        let mut session = DecryptionSession::new(Arc::new(EchoEngine));
        let secret = key_secret(&[
            ("team.agekey", "AGE-SECRET-KEY-1AAA\n"),
            ("README", "not a key"),
        ]);
        assert_eq!(session.add_key_material(&secret).await.unwrap(), 1);
        assert_eq!(session.key_service().backends().len(), 1);
    }

    #[tokio::test]
    async fn test_add_key_material_keeps_valid_entries_on_failure() {
        let mut session = DecryptionSession::new(Arc::new(EchoEngine));
        let secret = key_secret(&[
            ("team.agekey", "AGE-SECRET-KEY-1AAA\n"),
            ("sops.vault-token", "   "),
        ]);
        let err = session.add_key_material(&secret).await.unwrap_err();
        assert!(matches!(err, KeyMaterialError::Invalid { ref errors, .. } if errors.len() == 1));
        assert_eq!(session.loaded_entries(), 1);
        assert_eq!(session.key_service().backends().len(), 1);
    }

    #[tokio::test]
    async fn test_secret_without_key_entries() {
        let mut session = DecryptionSession::new(Arc::new(EchoEngine));
        let err = session
            .add_key_material(&key_secret(&[("config", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyMaterialError::NoEntries { .. }));
    }

    #[tokio::test]
    async fn test_decrypt_unwraps_data_and_string_data() {
        let mut session = DecryptionSession::new(Arc::new(EchoEngine));
        session
            .add_key_material(&key_secret(&[("team.agekey", "AGE-SECRET-KEY-1AAA")]))
            .await
            .unwrap();

        let item = SopsSecretItem {
            name: "db".to_string(),
            data: [("password".to_string(), "ENC[aHVudGVyMg==]".to_string())].into(),
            string_data: [("user".to_string(), "ENC[admin]".to_string())].into(),
            ..Default::default()
        };
        let decrypted = session.decrypt(&envelope(), &item).await.unwrap();
        assert_eq!(decrypted.data["password"], b"hunter2".to_vec());
        assert_eq!(decrypted.data["user"], b"admin".to_vec());
    }

    #[tokio::test]
    async fn test_decrypt_rejects_invalid_base64() {
        let mut session = DecryptionSession::new(Arc::new(EchoEngine));
        session
            .add_key_material(&key_secret(&[("team.agekey", "AGE-SECRET-KEY-1AAA")]))
            .await
            .unwrap();
        let item = SopsSecretItem {
            name: "db".to_string(),
            data: [("password".to_string(), "ENC[not base64!]".to_string())].into(),
            ..Default::default()
        };
        let err = session.decrypt(&envelope(), &item).await.unwrap_err();
        assert!(matches!(err, DecryptError::InvalidBase64 { ref key, .. } if key == "password"));
    }

    #[tokio::test]
    async fn test_engine_panic_becomes_error() {
        let mut session = DecryptionSession::new(Arc::new(PanickingEngine));
        session
            .add_key_material(&key_secret(&[("team.agekey", "AGE-SECRET-KEY-1AAA")]))
            .await
            .unwrap();
        let item = SopsSecretItem {
            name: "db".to_string(),
            ..Default::default()
        };
        let err = session.decrypt(&envelope(), &item).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to emit encrypted JSON file as decrypted JSON: malformed tree"
        );
    }

    #[tokio::test]
    async fn test_decrypt_without_matching_keys() {
        let session = DecryptionSession::new(Arc::new(EchoEngine));
        let item = SopsSecretItem::default();
        let err = session.decrypt(&envelope(), &item).await.unwrap_err();
        assert!(matches!(err, DecryptError::NoMatchingBackend { .. }));
    }
}
