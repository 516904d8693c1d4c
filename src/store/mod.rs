//! # Resource Store
//!
//! Every read and write the reconcilers perform against the cluster goes
//! through [`ClusterStore`]. [`KubeStore`] is the API server implementation;
//! tests substitute an in-memory one.

pub mod client;

pub use client::{status_patch, KubeStore};

use crate::crd::{GlobalSopsSecret, ObjectKey, SopsProvider, SopsSecret};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} was modified concurrently")]
    Conflict { kind: &'static str, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },
    #[error("{kind} has no name")]
    Unnamed { kind: &'static str },
    #[error("Kubernetes API error: {0}")]
    Api(#[from] ::kube::Error),
    #[error("failed to serialize {kind}: {source}")]
    Serialization {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError>;

    async fn list_providers(&self) -> Result<Vec<SopsProvider>, StoreError>;

    /// Secrets carrying the key-secret marker label, in every namespace
    async fn list_key_secrets(&self) -> Result<Vec<Secret>, StoreError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Replace a secret; the `resourceVersion` it carries guards the write
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Delete a secret. Returns `false` when it was already gone.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, StoreError>;

    async fn get_provider(&self, name: &str) -> Result<Option<SopsProvider>, StoreError>;

    async fn get_sops_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SopsSecret>, StoreError>;

    async fn get_global_sops_secret(
        &self,
        name: &str,
    ) -> Result<Option<GlobalSopsSecret>, StoreError>;

    /// Write the status of a provider, guarded by its `resourceVersion`
    async fn write_provider_status(&self, provider: &SopsProvider) -> Result<(), StoreError>;

    async fn write_sops_secret_status(&self, secret: &SopsSecret) -> Result<(), StoreError>;

    async fn write_global_sops_secret_status(
        &self,
        secret: &GlobalSopsSecret,
    ) -> Result<(), StoreError>;
}

/// A kind whose status the reconcilers persist
#[async_trait]
pub trait StatusResource: ::kube::Resource<DynamicType = ()> + Clone + Send + Sync + Sized {
    const KIND: &'static str;

    /// Latest stored version of the object named by `key`
    async fn fetch(store: &dyn ClusterStore, key: &ObjectKey) -> Result<Option<Self>, StoreError>;

    /// Persist the status carried by `self`
    async fn write_status(&self, store: &dyn ClusterStore) -> Result<(), StoreError>;

    fn key(&self) -> ObjectKey {
        ObjectKey::from_meta(self.meta())
    }
}

#[async_trait]
impl StatusResource for SopsProvider {
    const KIND: &'static str = "SopsProvider";

    async fn fetch(store: &dyn ClusterStore, key: &ObjectKey) -> Result<Option<Self>, StoreError> {
        store.get_provider(&key.name).await
    }

    async fn write_status(&self, store: &dyn ClusterStore) -> Result<(), StoreError> {
        store.write_provider_status(self).await
    }
}

#[async_trait]
impl StatusResource for SopsSecret {
    const KIND: &'static str = "SopsSecret";

    async fn fetch(store: &dyn ClusterStore, key: &ObjectKey) -> Result<Option<Self>, StoreError> {
        let namespace = key.namespace.as_deref().unwrap_or("default");
        store.get_sops_secret(namespace, &key.name).await
    }

    async fn write_status(&self, store: &dyn ClusterStore) -> Result<(), StoreError> {
        store.write_sops_secret_status(self).await
    }
}

#[async_trait]
impl StatusResource for GlobalSopsSecret {
    const KIND: &'static str = "GlobalSopsSecret";

    async fn fetch(store: &dyn ClusterStore, key: &ObjectKey) -> Result<Option<Self>, StoreError> {
        store.get_global_sops_secret(&key.name).await
    }

    async fn write_status(&self, store: &dyn ClusterStore) -> Result<(), StoreError> {
        store.write_global_sops_secret_status(self).await
    }
}
