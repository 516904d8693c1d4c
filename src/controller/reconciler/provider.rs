//! # SopsProvider Reconciliation
//!
//! Discovers the key secrets a provider may consume and validates each of
//! them. A broken key secret only degrades its own status entry.

use crate::controller::reconciler::status::{persist_status, RetryBackoff};
use crate::controller::reconciler::types::{Context, ReconcilerError};
use crate::crd::{
    Condition, ConditionReason, KeyItemStatus, ObjectKey, Origin, SopsProvider,
    SopsProviderStatus, SUCCEEDED_MESSAGE,
};
use crate::observability::metrics;
use crate::selector::NamespaceIndex;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

const KIND: &str = "SopsProvider";

/// Reconcile one provider
pub async fn reconcile_provider(
    provider: Arc<SopsProvider>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcilerError> {
    let name = provider.name_any();
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.provider.reconcile",
        resource.kind = KIND,
        resource.name = %name,
    );

    async move {
        let start = std::time::Instant::now();
        metrics::increment_reconciliations(KIND);

        let mut status = provider.status.clone().unwrap_or_default();
        let generation = provider.metadata.generation;
        let previous = status.condition.clone();

        let condition = match sync_provider(&provider, &mut status, &ctx).await {
            Ok(condition) => condition,
            Err(e) => {
                warn!("❌ Failed to reconcile provider {}: {}", name, e);
                status.condition = Some(
                    Condition::not_ready(generation, ConditionReason::Failed, e.to_string())
                        .since(previous.as_ref()),
                );
                persist(&ctx, &provider, &status).await?;
                return Err(e);
            }
        };
        status.condition = Some(condition.since(previous.as_ref()));

        persist(&ctx, &provider, &status).await?;
        if let Some(condition) = &status.condition {
            metrics::record_provider_condition(&name, condition);
        }
        metrics::observe_reconciliation_duration(KIND, start.elapsed().as_secs_f64());
        Ok(Action::await_change())
    }
    .instrument(span)
    .await
}

async fn persist(
    ctx: &Context,
    provider: &SopsProvider,
    status: &SopsProviderStatus,
) -> Result<(), ReconcilerError> {
    if provider.status.as_ref() == Some(status) {
        return Ok(());
    }
    persist_status(
        ctx.store.as_ref(),
        &ObjectKey::from_meta(&provider.metadata),
        status,
        RetryBackoff::default(),
        |latest: &mut SopsProvider, status| latest.status = Some(status),
    )
    .await
}

/// Select and validate key secrets; returns the aggregate condition
async fn sync_provider(
    provider: &SopsProvider,
    status: &mut SopsProviderStatus,
    ctx: &Context,
) -> Result<Condition, ReconcilerError> {
    let generation = provider.metadata.generation;
    let namespaces = NamespaceIndex::from_namespaces(&ctx.store.list_namespaces().await?);
    let candidates = ctx.store.list_key_secrets().await?;

    let mut selected: BTreeMap<ObjectKey, &Secret> = BTreeMap::new();
    let mut selector_errors = Vec::new();
    for selector in &provider.spec.providers {
        match selector.match_all(&candidates, &namespaces) {
            Ok(matched) => {
                for secret in matched {
                    selected.insert(ObjectKey::from_meta(&secret.metadata), secret);
                }
            }
            Err(e) => {
                warn!("Ignoring malformed key secret selector: {}", e);
                selector_errors.push(e.to_string());
            }
        }
    }
    debug!("Selected {} key secrets", selected.len());

    let mut failed = 0usize;
    for (key, secret) in &selected {
        let previous = status.get(key).map(|item| item.condition.clone());
        // each key secret is validated on its own so failures stay isolated
        let mut session = ctx.session();
        let condition = match session.add_key_material(secret).await {
            Ok(loaded) => {
                debug!("✅ Key secret {} provides {} key entries", key, loaded);
                Condition::ready(generation, format!("{loaded} key entries loaded"))
            }
            Err(e) => {
                warn!("❌ Key secret {} is not usable: {}", key, e);
                failed += 1;
                Condition::not_ready(generation, ConditionReason::DecryptionFailure, e.to_string())
            }
        };
        status.upsert(KeyItemStatus {
            origin: Origin::from_meta(&secret.metadata),
            condition: condition.since(previous.as_ref()),
        });
    }

    let selected_keys: BTreeSet<ObjectKey> = selected.keys().cloned().collect();
    for removed in status.retain_selected(&selected_keys) {
        info!("Key secret {} is no longer selected", removed);
    }

    let condition = if !selector_errors.is_empty() {
        Condition::not_ready(
            generation,
            ConditionReason::Failed,
            format!("invalid key secret selector: {}", selector_errors.join("; ")),
        )
    } else if selected.is_empty() {
        Condition::not_ready(
            generation,
            ConditionReason::NoKeySecrets,
            "no key secrets selected",
        )
    } else if failed > 0 {
        Condition::not_ready(
            generation,
            ConditionReason::Failed,
            format!("{failed} of {} key secrets could not be loaded", selected.len()),
        )
    } else {
        Condition::ready(generation, SUCCEEDED_MESSAGE)
    };
    Ok(condition)
}
