//! # SopsProvider
//!
//! Cluster-scoped resource tying decryption keys to the encrypted secrets
//! they may open.

use crate::crd::status::SopsProviderStatus;
use crate::selector::NamespacedSelector;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// SopsProvider Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: sops.microscaler.io/v1alpha1
/// kind: SopsProvider
/// metadata:
///   name: platform-keys
/// spec:
///   sops:
///     - namespaceSelector:
///         matchLabels:
///           team: platform
///       labelSelector: {}
///   providers:
///     - labelSelector:
///         matchLabels:
///           sops.microscaler.io/secret: "true"
///           purpose: platform
/// ```
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "SopsProvider",
    group = "sops.microscaler.io",
    version = "v1alpha1",
    status = "SopsProviderStatus",
    shortname = "sopsp",
    printcolumn = r#"{"name":"Keys", "type":"integer", "jsonPath":".status.size"}, {"name":"Ready", "type":"string", "jsonPath":".status.condition.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SopsProviderSpec {
    /// Encrypted secrets this provider may decrypt
    #[serde(default)]
    pub sops: Vec<NamespacedSelector>,
    /// Key secrets supplying this provider's key material
    #[serde(default)]
    pub providers: Vec<NamespacedSelector>,
}
