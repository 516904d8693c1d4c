//! Shared fixtures for the reconciler tests: an in-memory cluster store, a
//! scripted decryption engine and resource builders.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::ByteString;
use sops_operator::config::ControllerConfig;
use sops_operator::constants::{KEY_SECRET_LABEL, KEY_SECRET_LABEL_VALUE};
use sops_operator::controller::reconciler::Context;
use sops_operator::crd::sops::AgeKey;
use sops_operator::crd::{
    GlobalSopsSecret, GlobalSopsSecretItem, GlobalSopsSecretSpec, ObjectKey, SecretMetadata,
    SopsMetadata, SopsProvider, SopsProviderSpec, SopsSecret, SopsSecretItem, SopsSecretSpec,
};
use sops_operator::decryptor::{
    DecryptError, DecryptionFailureReason, DocumentFormat, EngineCredentials, SopsEngine,
};
use sops_operator::selector::NamespacedSelector;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sops_operator::store::{status_patch, ClusterStore, StoreError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const AGE_IDENTITY: &str = "AGE-SECRET-KEY-1OPERATORTEST";
pub const KEY_NAMESPACE: &str = "sops-system";

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, Namespace>,
    providers: BTreeMap<String, SopsProvider>,
    sops_secrets: BTreeMap<(String, String), SopsSecret>,
    globals: BTreeMap<String, GlobalSopsSecret>,
    secrets: BTreeMap<(String, String), Secret>,
    version: u64,
    injected_conflicts: u32,
    secret_writes: usize,
    status_writes: usize,
}

impl State {
    fn stamp(&mut self, meta: &mut ObjectMeta) {
        self.version += 1;
        meta.resource_version = Some(self.version.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", self.version));
        }
        if meta.generation.is_none() {
            meta.generation = Some(1);
        }
    }

    fn check_status_write(
        &mut self,
        kind: &'static str,
        key: ObjectKey,
        stored: &ObjectMeta,
        written: &ObjectMeta,
    ) -> Result<(), StoreError> {
        if self.injected_conflicts > 0 {
            self.injected_conflicts -= 1;
            return Err(StoreError::Conflict { kind, key });
        }
        if stored.resource_version != written.resource_version {
            return Err(StoreError::Conflict { kind, key });
        }
        self.status_writes += 1;
        Ok(())
    }
}

/// RFC 7386 merge, as the API server applies a merge patch
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Stored object after the status patch `KubeStore` would send for `written`
fn patched<K, S>(stored: &K, written: &ObjectMeta, status: &S) -> K
where
    K: Serialize + DeserializeOwned,
    S: Serialize,
{
    let mut document = serde_json::to_value(stored).unwrap();
    let patch = status_patch(written.resource_version.as_deref(), status);
    merge_patch(&mut document, &patch);
    serde_json::from_value(document).unwrap()
}

/// In-memory [`ClusterStore`] with API-server-like version checks.
///
/// Status writes are applied as merge patches, like the API server does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key_of(meta: &ObjectMeta) -> (String, String) {
    (
        meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
        meta.name.clone().unwrap_or_default(),
    )
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        self.state().namespaces.insert(name.to_string(), namespace);
    }

    pub fn put_provider(&self, mut provider: SopsProvider) -> SopsProvider {
        let mut state = self.state();
        if let Some(existing) = state.providers.get(&provider.metadata.name.clone().unwrap_or_default()) {
            provider.metadata.uid = existing.metadata.uid.clone();
            provider.status = existing.status.clone();
        }
        state.stamp(&mut provider.metadata);
        let name = provider.metadata.name.clone().unwrap_or_default();
        state.providers.insert(name, provider.clone());
        provider
    }

    pub fn put_sops_secret(&self, mut secret: SopsSecret) -> SopsSecret {
        let mut state = self.state();
        let key = key_of(&secret.metadata);
        if let Some(existing) = state.sops_secrets.get(&key) {
            secret.metadata.uid = existing.metadata.uid.clone();
            secret.status = existing.status.clone();
            secret.metadata.generation = existing.metadata.generation.map(|g| g + 1);
        }
        state.stamp(&mut secret.metadata);
        state.sops_secrets.insert(key, secret.clone());
        secret
    }

    pub fn put_global(&self, mut secret: GlobalSopsSecret) -> GlobalSopsSecret {
        let mut state = self.state();
        let name = secret.metadata.name.clone().unwrap_or_default();
        if let Some(existing) = state.globals.get(&name) {
            secret.metadata.uid = existing.metadata.uid.clone();
            secret.status = existing.status.clone();
        }
        state.stamp(&mut secret.metadata);
        state.globals.insert(name, secret.clone());
        secret
    }

    /// Store a secret as-is, bypassing ownership (key secrets, foreign secrets)
    pub fn put_secret(&self, mut secret: Secret) -> Secret {
        let mut state = self.state();
        state.stamp(&mut secret.metadata);
        state.secrets.insert(key_of(&secret.metadata), secret.clone());
        secret
    }

    pub fn remove_secret(&self, namespace: &str, name: &str) {
        self.state()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn provider(&self, name: &str) -> SopsProvider {
        self.state().providers[name].clone()
    }

    pub fn sops_secret(&self, namespace: &str, name: &str) -> SopsSecret {
        self.state().sops_secrets[&(namespace.to_string(), name.to_string())].clone()
    }

    pub fn global(&self, name: &str) -> GlobalSopsSecret {
        self.state().globals[name].clone()
    }

    pub fn inject_status_conflicts(&self, count: u32) {
        self.state().injected_conflicts = count;
    }

    pub fn secret_writes(&self) -> usize {
        self.state().secret_writes
    }

    pub fn status_writes(&self) -> usize {
        self.state().status_writes
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>, StoreError> {
        Ok(self.state().namespaces.values().cloned().collect())
    }

    async fn list_providers(&self) -> Result<Vec<SopsProvider>, StoreError> {
        Ok(self.state().providers.values().cloned().collect())
    }

    async fn list_key_secrets(&self) -> Result<Vec<Secret>, StoreError> {
        Ok(self
            .state()
            .secrets
            .values()
            .filter(|secret| {
                secret
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(KEY_SECRET_LABEL))
                    .is_some_and(|value| value == KEY_SECRET_LABEL_VALUE)
            })
            .cloned()
            .collect())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let mut state = self.state();
        let key = key_of(&secret.metadata);
        if state.secrets.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "Secret",
                key: ObjectKey::namespaced(&key.0, &key.1),
            });
        }
        let mut created = secret.clone();
        created.metadata.uid = None;
        state.stamp(&mut created.metadata);
        state.secret_writes += 1;
        state.secrets.insert(key, created.clone());
        Ok(created)
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let mut state = self.state();
        let key = key_of(&secret.metadata);
        let object_key = ObjectKey::namespaced(&key.0, &key.1);
        let Some(stored) = state.secrets.get(&key) else {
            return Err(StoreError::NotFound {
                kind: "Secret",
                key: object_key,
            });
        };
        if stored.metadata.resource_version != secret.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: "Secret",
                key: object_key,
            });
        }
        let mut replaced = secret.clone();
        replaced.metadata.uid = stored.metadata.uid.clone();
        state.stamp(&mut replaced.metadata);
        state.secret_writes += 1;
        state.secrets.insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .state()
            .secrets
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some())
    }

    async fn get_provider(&self, name: &str) -> Result<Option<SopsProvider>, StoreError> {
        Ok(self.state().providers.get(name).cloned())
    }

    async fn get_sops_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SopsSecret>, StoreError> {
        Ok(self
            .state()
            .sops_secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_global_sops_secret(
        &self,
        name: &str,
    ) -> Result<Option<GlobalSopsSecret>, StoreError> {
        Ok(self.state().globals.get(name).cloned())
    }

    async fn write_provider_status(&self, provider: &SopsProvider) -> Result<(), StoreError> {
        let mut state = self.state();
        let name = provider.metadata.name.clone().unwrap_or_default();
        let Some(stored) = state.providers.get(&name).cloned() else {
            return Ok(());
        };
        state.check_status_write(
            "SopsProvider",
            ObjectKey::cluster(&name),
            &stored.metadata,
            &provider.metadata,
        )?;
        let mut updated = patched(&stored, &provider.metadata, &provider.status);
        state.stamp(&mut updated.metadata);
        state.providers.insert(name, updated);
        Ok(())
    }

    async fn write_sops_secret_status(&self, secret: &SopsSecret) -> Result<(), StoreError> {
        let mut state = self.state();
        let key = key_of(&secret.metadata);
        let Some(stored) = state.sops_secrets.get(&key).cloned() else {
            return Ok(());
        };
        state.check_status_write(
            "SopsSecret",
            ObjectKey::namespaced(&key.0, &key.1),
            &stored.metadata,
            &secret.metadata,
        )?;
        let mut updated = patched(&stored, &secret.metadata, &secret.status);
        state.stamp(&mut updated.metadata);
        state.sops_secrets.insert(key, updated);
        Ok(())
    }

    async fn write_global_sops_secret_status(
        &self,
        secret: &GlobalSopsSecret,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let name = secret.metadata.name.clone().unwrap_or_default();
        let Some(stored) = state.globals.get(&name).cloned() else {
            return Ok(());
        };
        state.check_status_write(
            "GlobalSopsSecret",
            ObjectKey::cluster(&name),
            &stored.metadata,
            &secret.metadata,
        )?;
        let mut updated = patched(&stored, &secret.metadata, &secret.status);
        state.stamp(&mut updated.metadata);
        state.globals.insert(name, updated);
        Ok(())
    }
}

/// Decrypts by stripping the `ENC[...]` wrapper, provided the session
/// handed over [`AGE_IDENTITY`]
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

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
impl SopsEngine for ScriptedEngine {
    async fn decrypt(
        &self,
        document: Vec<u8>,
        _format: DocumentFormat,
        credentials: &EngineCredentials,
    ) -> Result<Vec<u8>, DecryptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let authorized = credentials
            .get("SOPS_AGE_KEY")
            .is_some_and(|keys| keys.lines().any(|key| key == AGE_IDENTITY));
        if !authorized {
            return Err(DecryptError::Engine {
                reason: DecryptionFailureReason::KeyNotFound,
                message: "no identity matched any of the recipients".to_string(),
            });
        }
        let mut value: serde_json::Value = serde_json::from_slice(&document).unwrap();
        strip_enc(&mut value["spec"]);
        Ok(serde_json::to_vec(&value).unwrap())
    }
}

pub fn context(store: &Arc<MemoryStore>, engine: &Arc<ScriptedEngine>) -> Arc<Context> {
    context_with(store, engine, ControllerConfig::default())
}

pub fn context_with(
    store: &Arc<MemoryStore>,
    engine: &Arc<ScriptedEngine>,
    config: ControllerConfig,
) -> Arc<Context> {
    let store: Arc<dyn ClusterStore> = store.clone();
    let engine: Arc<dyn SopsEngine> = engine.clone();
    Arc::new(Context::new(store, engine, config))
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn match_labels(pairs: &[(&str, &str)]) -> NamespacedSelector {
    NamespacedSelector {
        label_selector: Some(LabelSelector {
            match_labels: Some(labels(pairs)),
            ..LabelSelector::default()
        }),
        namespace_selector: None,
    }
}

/// Marker-labelled key secret holding one age identity file
pub fn key_secret(name: &str, identity: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(KEY_NAMESPACE.to_string()),
            labels: Some(labels(&[(KEY_SECRET_LABEL, KEY_SECRET_LABEL_VALUE)])),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            "operator.agekey".to_string(),
            ByteString(format!("{identity}\n").into_bytes()),
        )])),
        ..Secret::default()
    }
}

/// Provider that decrypts resources labelled `team=<team>` with every key secret
pub fn provider(name: &str, team: &str) -> SopsProvider {
    SopsProvider::new(
        name,
        SopsProviderSpec {
            sops: vec![match_labels(&[("team", team)])],
            providers: vec![match_labels(&[(KEY_SECRET_LABEL, KEY_SECRET_LABEL_VALUE)])],
        },
    )
}

pub fn envelope() -> SopsMetadata {
    SopsMetadata {
        age: vec![AgeKey {
            recipient: "age1operatortest".to_string(),
            enc: "-----BEGIN AGE ENCRYPTED FILE-----".to_string(),
        }],
        version: Some("3.9.0".to_string()),
        ..SopsMetadata::default()
    }
}

/// Item with one base64 `data` value and one `stringData` value, both encrypted
pub fn item(name: &str, password: &str) -> SopsSecretItem {
    SopsSecretItem {
        name: name.to_string(),
        data: BTreeMap::from([(
            "username".to_string(),
            format!("ENC[{}]", base64_encode(b"admin")),
        )]),
        string_data: BTreeMap::from([("password".to_string(), format!("ENC[{password}]"))]),
        ..SopsSecretItem::default()
    }
}

fn base64_encode(raw: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(raw)
}

pub fn sops_secret(namespace: &str, name: &str, team: &str, items: Vec<SopsSecretItem>) -> SopsSecret {
    SopsSecret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(&[("team", team)])),
            ..ObjectMeta::default()
        },
        spec: SopsSecretSpec {
            secrets: items,
            metadata: SecretMetadata::default(),
        },
        status: None,
        sops: Some(envelope()),
    }
}

pub fn global_secret(name: &str, team: &str, items: Vec<(&str, SopsSecretItem)>) -> GlobalSopsSecret {
    GlobalSopsSecret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(&[("team", team)])),
            ..ObjectMeta::default()
        },
        spec: GlobalSopsSecretSpec {
            secrets: items
                .into_iter()
                .map(|(namespace, item)| GlobalSopsSecretItem {
                    namespace: namespace.to_string(),
                    item,
                })
                .collect(),
            metadata: SecretMetadata::default(),
        },
        status: None,
        sops: Some(envelope()),
    }
}

/// Cluster with one namespace set, one key secret and one provider for `team=payments`
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    for namespace in [KEY_NAMESPACE, "default", "team-a", "team-b"] {
        store.add_namespace(namespace, &[]);
    }
    store.put_secret(key_secret("operator-keys", AGE_IDENTITY));
    store.put_provider(provider("payments", "payments"));
    store
}

/// Decoded value of one data entry
pub fn data_value(secret: &Secret, key: &str) -> String {
    let data = secret.data.as_ref().unwrap();
    String::from_utf8(data[key].0.clone()).unwrap()
}
