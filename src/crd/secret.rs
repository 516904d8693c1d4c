//! # SopsSecret
//!
//! Namespaced resource bundling SOPS-encrypted secret items with their
//! envelope. The `sops` block sits next to `spec` at the top level because
//! that is where the `sops` CLI writes it when encrypting the manifest, so
//! the kind is declared by hand instead of through the `CustomResource`
//! derive (which only generates `spec` and `status`).

use crate::constants::{API_GROUP, API_VERSION};
use crate::crd::sops::SopsMetadata;
use crate::crd::status::SopsSecretStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// One secret to materialize
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SopsSecretItem {
    /// Name of the secret (before prefix/suffix are applied)
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Kubernetes secret type, `Opaque` when unset
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    /// Base64 encoded values (encrypted until decrypted)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// Plain values (encrypted until decrypted)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutable: Option<bool>,
}

/// Naming and metadata applied to every materialized secret
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl SecretMetadata {
    pub fn target_name(&self, item_name: &str) -> String {
        format!("{}{item_name}{}", self.prefix, self.suffix)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SopsSecretSpec {
    #[serde(default)]
    pub secrets: Vec<SopsSecretItem>,
    #[serde(default)]
    pub metadata: SecretMetadata,
}

/// SopsSecret resource
///
/// # Example
///
/// ```yaml
/// apiVersion: sops.microscaler.io/v1alpha1
/// kind: SopsSecret
/// metadata:
///   name: database
///   namespace: payments
/// spec:
///   metadata:
///     prefix: app-
///   secrets:
///     - name: db-credentials
///       stringData:
///         password: ENC[AES256_GCM,data:...,type:str]
/// sops:
///   age:
///     - recipient: age1...
///       enc: ...
///   encrypted_regex: ^(data|stringData)$
///   version: 3.9.0
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct SopsSecret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: SopsSecretSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SopsSecretStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sops: Option<SopsMetadata>,
}

impl Resource for SopsSecret {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("SopsSecret")
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(API_GROUP)
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(API_VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("sopssecrets")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_manifest_with_top_level_sops() {
        let manifest = r#"
apiVersion: sops.microscaler.io/v1alpha1
kind: SopsSecret
metadata:
  name: database
  namespace: payments
spec:
  metadata:
    prefix: app-
    suffix: -v1
  secrets:
    - name: db
      type: kubernetes.io/basic-auth
      stringData:
        password: ENC[AES256_GCM,data:abc,iv:def,tag:ghi,type:str]
sops:
  pgp:
    - fp: 0123456789ABCDEF
      enc: armored
  version: 3.9.0
"#;
        let secret: SopsSecret = serde_yaml::from_str(manifest).unwrap();
        assert_eq!(secret.spec.secrets.len(), 1);
        assert_eq!(
            secret.spec.secrets[0].type_.as_deref(),
            Some("kubernetes.io/basic-auth")
        );
        assert_eq!(secret.spec.metadata.target_name("db"), "app-db-v1");
        assert_eq!(secret.sops.unwrap().pgp[0].fp, "0123456789ABCDEF");
    }

    #[test]
    fn test_resource_coordinates() {
        assert_eq!(SopsSecret::api_version(&()), "sops.microscaler.io/v1alpha1");
        assert_eq!(SopsSecret::plural(&()), "sopssecrets");
    }
}
