//! # Kubernetes Store
//!
//! [`ClusterStore`] over the Kubernetes API.
//!
//! Status writes are merge patches of the `status` subresource that carry
//! the `metadata.resourceVersion` the status was computed from. A stale
//! write is answered with HTTP 409 and surfaces as
//! [`StoreError::Conflict`]. An object deleted while it was being
//! reconciled is not an error.

use crate::constants::{KEY_SECRET_LABEL, KEY_SECRET_LABEL_VALUE};
use crate::crd::{GlobalSopsSecret, ObjectKey, SopsProvider, SopsSecret};
use crate::store::{ClusterStore, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    async fn patch_status<K, S>(
        &self,
        api: Api<K>,
        kind: &'static str,
        resource: &K,
        status: &S,
    ) -> Result<(), StoreError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        S: Serialize,
    {
        let key = ObjectKey::from_meta(resource.meta());
        let name = resource
            .meta()
            .name
            .as_deref()
            .ok_or(StoreError::Unnamed { kind })?;
        let patch = status_patch(resource.meta().resource_version.as_deref(), status);
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        match api.patch_status(name, &params, &Patch::Merge(&patch)).await {
            Ok(_) => {
                debug!("Updated status of {} {}", kind, key);
                Ok(())
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                Err(StoreError::Conflict { kind, key })
            }
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                debug!("{} {} is gone, status not written", kind, key);
                Ok(())
            }
            Err(e) => Err(StoreError::Api(e)),
        }
    }
}

/// Merge patch body of a status write.
///
/// The whole status is sent on every write. Lists are replaced wholesale
/// and `null` removes a field, so a cleared value never survives on the
/// server.
pub fn status_patch<S: Serialize>(resource_version: Option<&str>, status: &S) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

fn not_found_as_none<T>(result: Result<T, kube::Error>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(object) => Ok(Some(object)),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(None),
        Err(e) => Err(StoreError::Api(e)),
    }
}

fn secret_key(secret: &Secret) -> Result<(String, String), StoreError> {
    let name = secret
        .metadata
        .name
        .clone()
        .ok_or(StoreError::Unnamed { kind: "Secret" })?;
    let namespace = secret
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    Ok((namespace, name))
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_providers(&self) -> Result<Vec<SopsProvider>, StoreError> {
        let api: Api<SopsProvider> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_key_secrets(&self) -> Result<Vec<Secret>, StoreError> {
        let api: Api<Secret> = Api::all(self.client.clone());
        let params =
            ListParams::default().labels(&format!("{KEY_SECRET_LABEL}={KEY_SECRET_LABEL_VALUE}"));
        Ok(api.list(&params).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        not_found_as_none(api.get(name).await)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = secret_key(secret)?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&self.post_params(), secret).await {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                Err(StoreError::AlreadyExists {
                    kind: "Secret",
                    key: ObjectKey::namespaced(&namespace, &name),
                })
            }
            Err(e) => Err(StoreError::Api(e)),
        }
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = secret_key(secret)?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        match api.replace(&name, &self.post_params(), secret).await {
            Ok(replaced) => Ok(replaced),
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => Err(StoreError::Conflict {
                kind: "Secret",
                key: ObjectKey::namespaced(&namespace, &name),
            }),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(StoreError::NotFound {
                kind: "Secret",
                key: ObjectKey::namespaced(&namespace, &name),
            }),
            Err(e) => Err(StoreError::Api(e)),
        }
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(StoreError::Api(e)),
        }
    }

    async fn get_provider(&self, name: &str) -> Result<Option<SopsProvider>, StoreError> {
        let api: Api<SopsProvider> = Api::all(self.client.clone());
        not_found_as_none(api.get(name).await)
    }

    async fn get_sops_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SopsSecret>, StoreError> {
        let api: Api<SopsSecret> = Api::namespaced(self.client.clone(), namespace);
        not_found_as_none(api.get(name).await)
    }

    async fn get_global_sops_secret(
        &self,
        name: &str,
    ) -> Result<Option<GlobalSopsSecret>, StoreError> {
        let api: Api<GlobalSopsSecret> = Api::all(self.client.clone());
        not_found_as_none(api.get(name).await)
    }

    async fn write_provider_status(&self, provider: &SopsProvider) -> Result<(), StoreError> {
        let api: Api<SopsProvider> = Api::all(self.client.clone());
        self.patch_status(api, "SopsProvider", provider, &provider.status)
            .await
    }

    async fn write_sops_secret_status(&self, secret: &SopsSecret) -> Result<(), StoreError> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or("default");
        let api: Api<SopsSecret> = Api::namespaced(self.client.clone(), namespace);
        self.patch_status(api, "SopsSecret", secret, &secret.status)
            .await
    }

    async fn write_global_sops_secret_status(
        &self,
        secret: &GlobalSopsSecret,
    ) -> Result<(), StoreError> {
        let api: Api<GlobalSopsSecret> = Api::all(self.client.clone());
        self.patch_status(api, "GlobalSopsSecret", secret, &secret.status)
            .await
    }
}
