//! # SOPS Envelope
//!
//! Typed model of the `sops` metadata block written by the `sops` CLI next to
//! the encrypted content. The operator never interprets the cryptographic
//! fields; it reads the key descriptors to pick decryption backends and hands
//! the whole block back to the decryption engine unchanged.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
pub struct SopsMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shamir_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_groups: Vec<KeyGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kms: Vec<KmsKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gcp_kms: Vec<GcpKmsKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub azure_kv: Vec<AzureKvKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hc_vault: Vec<VaultKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub age: Vec<AgeKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pgp: Vec<PgpKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastmodified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unencrypted_comment_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_comment_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_only_encrypted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Fields added by newer sops releases, passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One key group; a data key share is recoverable by any key in the group
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct KeyGroup {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kms: Vec<KmsKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gcp_kms: Vec<GcpKmsKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub azure_kv: Vec<AzureKvKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hc_vault: Vec<VaultKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub age: Vec<AgeKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pgp: Vec<PgpKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct PgpKey {
    #[serde(default)]
    pub fp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub enc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct KmsKey {
    #[serde(default)]
    pub arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub enc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_profile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct GcpKmsKey {
    #[serde(default)]
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub enc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct VaultKey {
    #[serde(default)]
    pub vault_address: String,
    #[serde(default)]
    pub engine_path: String,
    #[serde(default)]
    pub key_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub enc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct AzureKvKey {
    #[serde(default)]
    pub vault_url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub enc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub struct AgeKey {
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub enc: String,
}

impl SopsMetadata {
    /// Top-level key lists followed by every key group, flattened.
    pub fn groups(&self) -> Vec<KeyGroup> {
        let top_level = KeyGroup {
            kms: self.kms.clone(),
            gcp_kms: self.gcp_kms.clone(),
            azure_kv: self.azure_kv.clone(),
            hc_vault: self.hc_vault.clone(),
            age: self.age.clone(),
            pgp: self.pgp.clone(),
        };
        std::iter::once(top_level)
            .chain(self.key_groups.iter().cloned())
            .filter(|group| !group.is_empty())
            .collect()
    }
}

impl KeyGroup {
    pub fn is_empty(&self) -> bool {
        self.kms.is_empty()
            && self.gcp_kms.is_empty()
            && self.azure_kv.is_empty()
            && self.hc_vault.is_empty()
            && self.age.is_empty()
            && self.pgp.is_empty()
    }
}
