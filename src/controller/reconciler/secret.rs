//! # SopsSecret / GlobalSopsSecret Reconciliation
//!
//! One pass over an encrypted resource:
//!
//! 1. Match the resource against every `SopsProvider`'s `sops` selectors.
//!    No match is a policy failure: everything previously materialized is
//!    removed (fail closed).
//! 2. Load the ready key secrets of the matched providers into a fresh
//!    [`DecryptionSession`].
//! 3. Reject resources without a SOPS envelope, again removing prior output.
//! 4. Decrypt and replicate each declared item, in declaration order.
//! 5. Garbage-collect secrets recorded in status but no longer declared.
//! 6. Aggregate the per-item conditions and persist status.
//!
//! Both kinds share this code through [`SopsResource`]; the only difference
//! is where each item's target namespace comes from.

use crate::controller::reconciler::replicate::{is_owned_by, replicate_item, ItemTarget};
use crate::controller::reconciler::status::{persist_status, RetryBackoff};
use crate::controller::reconciler::types::{Context, Outcome, ReconcilerError};
use crate::crd::{
    Condition, ConditionReason, ObjectKey, Origin, SecretItemStatus, SopsProvider, SopsResource,
    SopsSecretStatus, SECRETS_FAILED_MESSAGE, SUCCEEDED_MESSAGE,
};
use crate::decryptor::DecryptionSession;
use crate::observability::metrics;
use crate::selector::{any_matches, NamespaceIndex};
use crate::store::{ClusterStore, StatusResource};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Reconcile one `SopsSecret` or `GlobalSopsSecret`
pub async fn reconcile_secret<K>(
    resource: Arc<K>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcilerError>
where
    K: SopsResource + StatusResource,
{
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_default();
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.secret.reconcile",
        resource.kind = K::KIND,
        resource.name = %name,
        resource.namespace = %namespace,
    );

    async move {
        let start = std::time::Instant::now();
        metrics::increment_reconciliations(K::KIND);

        let generation = resource.meta().generation;
        let mut status = resource.status().cloned().unwrap_or_default();
        let previous = status.condition.clone();

        let outcome = match sync_secret(resource.as_ref(), &mut status, &ctx).await {
            Ok((condition, outcome)) => {
                status.condition = Some(condition.since(previous.as_ref()));
                outcome
            }
            Err(e) => {
                warn!("❌ Failed to reconcile {} {}: {}", K::KIND, name, e);
                status.condition = Some(
                    Condition::not_ready(generation, ConditionReason::Failed, e.to_string())
                        .since(previous.as_ref()),
                );
                persist(&ctx, resource.as_ref(), &status).await?;
                return Err(e);
            }
        };

        persist(&ctx, resource.as_ref(), &status).await?;
        if let Some(condition) = &status.condition {
            metrics::record_secret_condition(&name, &namespace, condition);
        }
        metrics::observe_reconciliation_duration(K::KIND, start.elapsed().as_secs_f64());

        match outcome {
            Outcome::Synced => info!("✅ {} {} reconciled ({} secrets)", K::KIND, name, status.size),
            Outcome::ItemsFailed => warn!("❌ {} {}: {}", K::KIND, name, SECRETS_FAILED_MESSAGE),
            Outcome::PolicyFailure => {}
        }
        Ok(outcome.action(&ctx.config))
    }
    .instrument(span)
    .await
}

async fn persist<K>(ctx: &Context, resource: &K, status: &SopsSecretStatus) -> Result<(), ReconcilerError>
where
    K: SopsResource + StatusResource,
{
    if resource.status() == Some(status) {
        return Ok(());
    }
    persist_status(
        ctx.store.as_ref(),
        &resource.key(),
        status,
        RetryBackoff::default(),
        |latest: &mut K, status| *latest.status_mut() = Some(status),
    )
    .await
}

/// Run the pass; returns the aggregate condition and how the pass ended
async fn sync_secret<K>(
    resource: &K,
    status: &mut SopsSecretStatus,
    ctx: &Context,
) -> Result<(Condition, Outcome), ReconcilerError>
where
    K: SopsResource + StatusResource,
{
    let generation = resource.meta().generation;
    let owner_uid = resource.uid();
    let store = ctx.store.as_ref();

    let providers = matching_providers(store, resource).await?;
    if providers.is_empty() {
        warn!("❌ No SopsProvider matches {} {}", K::KIND, resource.key());
        status.providers.clear();
        cleanup(store, owner_uid.as_deref(), status).await?;
        return Ok((
            Condition::not_ready(
                generation,
                ConditionReason::DecryptionFailure,
                format!("secret {} has no decryption providers", resource.key()),
            ),
            Outcome::PolicyFailure,
        ));
    }

    status.providers = if ctx.config.enable_status {
        providers
            .iter()
            .map(|provider| Origin::from_meta(&provider.metadata))
            .collect()
    } else {
        Vec::new()
    };

    let mut session = ctx.session();
    load_key_material(store, &mut session, &providers).await?;
    debug!(
        "Decryption session holds {} key entries from {} providers",
        session.loaded_entries(),
        providers.len()
    );

    let Some(envelope) = resource.sops().filter(|_| session.is_encrypted(resource)) else {
        warn!("❌ {} {} is not SOPS encrypted", K::KIND, resource.key());
        cleanup(store, owner_uid.as_deref(), status).await?;
        return Ok((
            Condition::not_ready(
                generation,
                ConditionReason::NotSopsEncrypted,
                "secret missing SOPS encryption marker (not encrypted)",
            ),
            Outcome::PolicyFailure,
        ));
    };

    let mut selected = BTreeSet::new();
    let mut failed = 0usize;
    let defaults = resource.secret_metadata();
    for target in resource.targets() {
        let name = defaults.target_name(&target.item.name);
        let key = ObjectKey::namespaced(target.namespace, &name);
        let previous = status.get(&key).map(|item| item.condition.clone());

        let outcome = replicate_item(
            store,
            &session,
            resource,
            envelope,
            ItemTarget {
                namespace: target.namespace,
                name: &name,
                item: target.item,
            },
        )
        .await;
        if !outcome.condition.is_ready() {
            failed += 1;
        }
        status.upsert(SecretItemStatus {
            name,
            namespace: target.namespace.to_string(),
            uid: outcome.uid,
            condition: outcome.condition.since(previous.as_ref()),
        });
        selected.insert(key);
    }
    drop(session);

    for key in status.unselected(&selected) {
        info!("Secret {} is no longer declared, removing it", key);
        delete_owned(store, &key, owner_uid.as_deref()).await?;
        status.remove(&key);
    }

    if failed > 0 {
        Ok((
            Condition::not_ready(generation, ConditionReason::Failed, SECRETS_FAILED_MESSAGE),
            Outcome::ItemsFailed,
        ))
    } else {
        Ok((Condition::ready(generation, SUCCEEDED_MESSAGE), Outcome::Synced))
    }
}

/// Providers whose `sops` selectors match the resource, in listing order
async fn matching_providers<K: SopsResource>(
    store: &dyn ClusterStore,
    resource: &K,
) -> Result<Vec<SopsProvider>, ReconcilerError> {
    let namespaces = NamespaceIndex::from_namespaces(&store.list_namespaces().await?);
    let mut matched = Vec::new();
    for provider in store.list_providers().await? {
        let (is_match, errors) = any_matches(&provider.spec.sops, resource, &namespaces);
        for e in errors {
            warn!("SopsProvider {} has a malformed selector: {}", provider.name_any(), e);
        }
        if is_match {
            matched.push(provider);
        }
    }
    Ok(matched)
}

/// Feed every ready key secret of the matched providers into the session.
///
/// A key secret that fails to load is logged and skipped; items that needed
/// it fail individually later.
async fn load_key_material(
    store: &dyn ClusterStore,
    session: &mut DecryptionSession,
    providers: &[SopsProvider],
) -> Result<(), ReconcilerError> {
    for provider in providers {
        let Some(provider_status) = &provider.status else {
            continue;
        };
        for key_item in provider_status.ready_keys() {
            let namespace = key_item.origin.namespace.as_deref().unwrap_or("default");
            let Some(secret) = store.get_secret(namespace, &key_item.origin.name).await? else {
                warn!(
                    "Key secret {} of provider {} no longer exists",
                    key_item.origin.key(),
                    provider.name_any()
                );
                continue;
            };
            if let Err(e) = session.add_key_material(&secret).await {
                warn!("❌ Key secret {} could not be loaded: {}", key_item.origin.key(), e);
            }
        }
    }
    Ok(())
}

/// Delete every secret recorded in status and empty the list
async fn cleanup(
    store: &dyn ClusterStore,
    owner_uid: Option<&str>,
    status: &mut SopsSecretStatus,
) -> Result<(), ReconcilerError> {
    let recorded: Vec<ObjectKey> = status.secrets.iter().map(SecretItemStatus::key).collect();
    for key in recorded {
        delete_owned(store, &key, owner_uid).await?;
        status.remove(&key);
    }
    Ok(())
}

/// Delete the secret at `key` if it is owned by `owner_uid`.
/// Secrets owned by anyone else are left alone.
async fn delete_owned(
    store: &dyn ClusterStore,
    key: &ObjectKey,
    owner_uid: Option<&str>,
) -> Result<(), ReconcilerError> {
    let namespace = key.namespace.as_deref().unwrap_or("default");
    let Some(secret) = store.get_secret(namespace, &key.name).await? else {
        return Ok(());
    };
    match owner_uid {
        Some(uid) if is_owned_by(&secret, uid) => {
            if store.delete_secret(namespace, &key.name).await? {
                info!("🗑️ Deleted secret {}", key);
            }
        }
        _ => debug!("Secret {} is not ours, leaving it in place", key),
    }
    Ok(())
}
