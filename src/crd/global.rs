//! # GlobalSopsSecret
//!
//! Cluster-scoped variant of [`SopsSecret`](crate::crd::SopsSecret) where
//! every item names the namespace it is materialized in.

use crate::constants::{API_GROUP, API_VERSION};
use crate::crd::secret::{SecretMetadata, SopsSecretItem};
use crate::crd::sops::SopsMetadata;
use crate::crd::status::SopsSecretStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ClusterResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSopsSecretItem {
    /// Namespace the secret is materialized in
    pub namespace: String,
    #[serde(flatten)]
    pub item: SopsSecretItem,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSopsSecretSpec {
    #[serde(default)]
    pub secrets: Vec<GlobalSopsSecretItem>,
    #[serde(default)]
    pub metadata: SecretMetadata,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct GlobalSopsSecret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: GlobalSopsSecretSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SopsSecretStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sops: Option<SopsMetadata>,
}

impl Resource for GlobalSopsSecret {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("GlobalSopsSecret")
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(API_GROUP)
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(API_VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("globalsopssecrets")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
