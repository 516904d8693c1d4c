//! # Secret Replication
//!
//! Materializes one decrypted item as a plaintext `Secret` owned by the
//! resource that declared it.
//!
//! A target that already exists is only touched when it carries an owner
//! reference to the declaring resource. Anything else is reported as an
//! ownership conflict and left exactly as it is.

use crate::constants::DEFAULT_SECRET_TYPE;
use crate::crd::{
    Condition, ConditionReason, SopsMetadata, SopsResource, SopsSecretItem, SUCCEEDED_MESSAGE,
};
use crate::decryptor::DecryptionSession;
use crate::observability::metrics;
use crate::store::ClusterStore;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Result of replicating one item
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    /// Uid of the materialized secret, when one exists and is ours
    pub uid: Option<String>,
    pub condition: Condition,
}

/// Where and what to materialize
#[derive(Debug, Clone, Copy)]
pub struct ItemTarget<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
    pub item: &'a SopsSecretItem,
}

/// True when `secret` carries an owner reference with the given uid
pub fn is_owned_by(secret: &Secret, owner_uid: &str) -> bool {
    secret
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|owner| owner.uid == owner_uid))
}

/// Decrypt `target.item` and create or update its plaintext secret.
///
/// Never returns an error: every failure is an item-level condition so the
/// remaining items of the resource are still processed.
pub async fn replicate_item<K: SopsResource>(
    store: &dyn ClusterStore,
    session: &DecryptionSession,
    resource: &K,
    envelope: &SopsMetadata,
    target: ItemTarget<'_>,
) -> ItemOutcome {
    let generation = resource.meta().generation;
    let failed = |reason, message: String| ItemOutcome {
        uid: None,
        condition: Condition::not_ready(generation, reason, message),
    };

    let Some(owner) = resource.controller_owner_ref(&()) else {
        return failed(
            ConditionReason::ReplicationFailure,
            "resource has no uid yet, cannot own secrets".to_string(),
        );
    };

    let existing = match store.get_secret(target.namespace, target.name).await {
        Ok(existing) => existing,
        Err(e) => {
            warn!("❌ Failed to read secret {}/{}: {}", target.namespace, target.name, e);
            return failed(ConditionReason::ReplicationFailure, e.to_string());
        }
    };
    if let Some(existing) = &existing {
        if !is_owned_by(existing, &owner.uid) {
            warn!(
                "❌ Secret {}/{} exists and is owned by someone else, not touching it",
                target.namespace, target.name
            );
            return failed(
                ConditionReason::OwnershipConflict,
                format!(
                    "secret {}/{} already present, but not provisioned by sops-operator",
                    target.namespace, target.name
                ),
            );
        }
    }
    let existing_uid = existing.as_ref().and_then(|s| s.metadata.uid.clone());

    let decrypted = match session.decrypt(envelope, target.item).await {
        Ok(decrypted) => {
            metrics::increment_decryptions("success");
            decrypted
        }
        Err(e) => {
            metrics::increment_decryptions(e.as_str());
            warn!(
                "❌ Failed to decrypt item {} for {}/{}: {}",
                target.item.name, target.namespace, target.name, e
            );
            // whatever was materialized before stays in place
            return ItemOutcome {
                uid: existing_uid,
                condition: Condition::not_ready(
                    generation,
                    ConditionReason::DecryptionFailure,
                    e.to_string(),
                ),
            };
        }
    };

    let data = decrypted
        .data
        .iter()
        .map(|(key, value)| (key.clone(), ByteString(value.clone())))
        .collect();
    let desired = desired_secret(resource, &target, existing.as_ref(), owner, data);

    if existing.as_ref() == Some(&desired) {
        debug!("Secret {}/{} is up to date", target.namespace, target.name);
        return ItemOutcome {
            uid: existing_uid,
            condition: Condition::ready(generation, SUCCEEDED_MESSAGE),
        };
    }

    let written = if existing.is_some() {
        store.replace_secret(&desired).await
    } else {
        store.create_secret(&desired).await
    };
    match written {
        Ok(secret) => {
            info!("✅ Replicated secret {}/{}", target.namespace, target.name);
            ItemOutcome {
                uid: secret.metadata.uid,
                condition: Condition::ready(generation, SUCCEEDED_MESSAGE),
            }
        }
        Err(e) => {
            warn!("❌ Failed to write secret {}/{}: {}", target.namespace, target.name, e);
            ItemOutcome {
                uid: existing_uid,
                condition: Condition::not_ready(
                    generation,
                    ConditionReason::ReplicationFailure,
                    e.to_string(),
                ),
            }
        }
    }
}

fn desired_secret<K: SopsResource>(
    resource: &K,
    target: &ItemTarget<'_>,
    existing: Option<&Secret>,
    owner: OwnerReference,
    data: BTreeMap<String, ByteString>,
) -> Secret {
    let defaults = resource.secret_metadata();
    let mut secret = existing.cloned().unwrap_or_else(|| Secret {
        metadata: ObjectMeta {
            name: Some(target.name.to_string()),
            namespace: Some(target.namespace.to_string()),
            ..ObjectMeta::default()
        },
        ..Secret::default()
    });

    let labels = merged(
        secret.metadata.labels.take(),
        &defaults.labels,
        &target.item.labels,
    );
    secret.metadata.labels = (!labels.is_empty()).then_some(labels);
    let annotations = merged(
        secret.metadata.annotations.take(),
        &defaults.annotations,
        &target.item.annotations,
    );
    secret.metadata.annotations = (!annotations.is_empty()).then_some(annotations);

    let owners = secret.metadata.owner_references.get_or_insert_with(Vec::new);
    if !owners.iter().any(|existing| existing.uid == owner.uid) {
        owners.push(owner);
    }

    secret.type_ = target
        .item
        .type_
        .clone()
        .or(secret.type_.take())
        .or_else(|| Some(DEFAULT_SECRET_TYPE.to_string()));
    secret.immutable = target.item.immutable.or(secret.immutable);
    secret.data = Some(data);
    secret.string_data = None;
    secret
}

/// Existing entries, overridden by resource defaults, overridden by the item
fn merged(
    existing: Option<BTreeMap<String, String>>,
    defaults: &BTreeMap<String, String>,
    item: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = existing.unwrap_or_default();
    merged.extend(defaults.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged.extend(item.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
