//! # Key Secret Entries
//!
//! Classification and parsing of the entries of a key-bearing secret.
//!
//! One rule decides what an entry is: its full name is looked up in the
//! fixed credential table first, then its extension is looked up in the key
//! file table. Everything else is ignored.
//!
//! | Entry name          | Kind                       |
//! |---------------------|----------------------------|
//! | `sops.vault-token`  | Vault token                |
//! | `sops.aws-kms`      | AWS credentials (YAML)     |
//! | `sops.azure-kv`     | Azure AAD config           |
//! | `sops.gcp-kms`      | GCP credentials JSON       |
//! | `*.asc`             | ASCII-armored PGP key      |
//! | `*.agekey`          | age identities             |

use crate::decryptor::error::CredentialError;
use serde::Deserialize;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const VAULT_TOKEN_ENTRY: &str = "sops.vault-token";
pub const AWS_KMS_ENTRY: &str = "sops.aws-kms";
pub const AZURE_KV_ENTRY: &str = "sops.azure-kv";
pub const GCP_KMS_ENTRY: &str = "sops.gcp-kms";
pub const PGP_EXTENSION: &str = ".asc";
pub const AGE_EXTENSION: &str = ".agekey";

/// What a key secret entry contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    PgpKey,
    AgeIdentities,
    VaultToken,
    AwsCredentials,
    AzureCredentials,
    GcpCredentials,
}

/// Classify a key secret entry by name. `None` means the entry is ignored.
pub fn classify(entry: &str) -> Option<EntryKind> {
    match entry {
        VAULT_TOKEN_ENTRY => return Some(EntryKind::VaultToken),
        AWS_KMS_ENTRY => return Some(EntryKind::AwsCredentials),
        AZURE_KV_ENTRY => return Some(EntryKind::AzureCredentials),
        GCP_KMS_ENTRY => return Some(EntryKind::GcpCredentials),
        _ => {}
    }
    // An entry that is nothing but the extension has no file name.
    if entry.len() > PGP_EXTENSION.len() && entry.ends_with(PGP_EXTENSION) {
        return Some(EntryKind::PgpKey);
    }
    if entry.len() > AGE_EXTENSION.len() && entry.ends_with(AGE_EXTENSION) {
        return Some(EntryKind::AgeIdentities);
    }
    None
}

/// Secret string wiped from memory on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Sensitive(String);

impl Sensitive {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sensitive(***)")
    }
}

/// Decode an entry as UTF-8 text
pub fn entry_text(entry: &str, raw: &[u8]) -> Result<Sensitive, CredentialError> {
    let text = std::str::from_utf8(raw).map_err(|_utf8| CredentialError::NotUtf8 {
        entry: entry.to_string(),
    })?;
    Ok(Sensitive::new(text))
}

/// Vault token, surrounding whitespace removed
pub fn parse_vault_token(entry: &str, raw: &[u8]) -> Result<Sensitive, CredentialError> {
    let text = entry_text(entry, raw)?;
    let token = text.expose().trim();
    if token.is_empty() {
        return Err(CredentialError::Empty {
            entry: entry.to_string(),
        });
    }
    Ok(Sensitive::new(token))
}

/// age identities, one `AGE-SECRET-KEY-1...` per line; comments and blank lines are skipped
pub fn parse_age_identities(entry: &str, raw: &[u8]) -> Result<Vec<Sensitive>, CredentialError> {
    let text = entry_text(entry, raw)?;
    let identities: Vec<Sensitive> = text
        .expose()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.starts_with("AGE-SECRET-KEY-1"))
        .map(Sensitive::new)
        .collect();
    if identities.is_empty() {
        return Err(CredentialError::NoAgeIdentities {
            entry: entry.to_string(),
        });
    }
    Ok(identities)
}

/// Static AWS credentials
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct AwsCredentialsDocument {
    aws_access_key_id: Option<String>,
    aws_secret_access_key: Option<String>,
    aws_session_token: Option<String>,
}

pub fn parse_aws_credentials(entry: &str, raw: &[u8]) -> Result<AwsCredentials, CredentialError> {
    let document: AwsCredentialsDocument =
        serde_yaml::from_slice(raw).map_err(|source| CredentialError::InvalidAws {
            entry: entry.to_string(),
            source,
        })?;
    let access_key_id = required(entry, "aws_access_key_id", document.aws_access_key_id)?;
    let secret_access_key =
        required(entry, "aws_secret_access_key", document.aws_secret_access_key)?;
    Ok(AwsCredentials {
        access_key_id,
        secret_access_key,
        session_token: document.aws_session_token.filter(|t| !t.is_empty()),
    })
}

/// Azure service principal (AAD config)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authority_host: Option<String>,
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AadConfig {
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    authority_host: Option<String>,
}

pub fn parse_azure_credentials(
    entry: &str,
    raw: &[u8],
) -> Result<AzureCredentials, CredentialError> {
    // YAML is a superset of JSON, so both encodings of the config parse here.
    let config: AadConfig =
        serde_yaml::from_slice(raw).map_err(|source| CredentialError::InvalidAzure {
            entry: entry.to_string(),
            source,
        })?;
    Ok(AzureCredentials {
        tenant_id: required(entry, "tenantId", config.tenant_id)?,
        client_id: required(entry, "clientId", config.client_id)?,
        client_secret: required(entry, "clientSecret", config.client_secret)?,
        authority_host: config.authority_host.filter(|h| !h.is_empty()),
    })
}

/// GCP credentials JSON, newlines removed
pub fn parse_gcp_credentials(entry: &str, raw: &[u8]) -> Result<Sensitive, CredentialError> {
    let text = entry_text(entry, raw)?;
    let flattened: String = text.expose().chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let is_object = serde_json::from_str::<serde_json::Value>(&flattened)
        .map(|value| value.is_object())
        .unwrap_or(false);
    if !is_object {
        return Err(CredentialError::InvalidGcp {
            entry: entry.to_string(),
        });
    }
    Ok(Sensitive::new(flattened))
}

fn required(
    entry: &str,
    field: &'static str,
    value: Option<String>,
) -> Result<String, CredentialError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CredentialError::MissingField {
            entry: entry.to_string(),
            field,
        })
}
