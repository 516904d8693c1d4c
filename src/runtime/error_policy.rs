//! # Error Policy
//!
//! What the controllers do with a failed reconciliation and with errors
//! surfaced by the controller stream.

use crate::controller::reconciler::{Context, ReconcilerError};
use crate::observability::metrics;
use crate::store::StatusResource;
use kube::ResourceExt;
use kube_runtime::controller::{self, Action};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Requeue a failed resource after the configured error interval
pub fn handle_reconciliation_error<K: StatusResource>(
    obj: Arc<K>,
    error: &ReconcilerError,
    ctx: Arc<Context>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();
    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = K::KIND,
        resource.name = %name,
        resource.namespace = %namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {} {}: {}", K::KIND, name, error);
    metrics::increment_reconciliation_errors(K::KIND);

    let delay = ctx.config.reconciliation_error_requeue();
    info!(
        "🔄 Retrying {} {} in {}s (trigger source: error-backoff)",
        K::KIND,
        name,
        delay.as_secs()
    );
    metrics::increment_requeues_total("error-backoff");
    Action::requeue(delay)
}

/// Log one result of a controller stream.
///
/// `on_gone` is called for objects that were deleted before they could be
/// reconciled, so per-object gauges can be dropped.
pub fn handle_controller_result<K, F>(
    result: Result<(ObjectRef<K>, Action), controller::Error<ReconcilerError, watcher::Error>>,
    on_gone: F,
) where
    K: kube::Resource,
    F: Fn(&str, Option<&str>),
{
    match result {
        Ok((object, action)) => debug!("Reconciled {}: {:?}", object, action),
        Err(controller::Error::ObjectNotFound(object)) => {
            debug!("{} is gone, clearing its metrics", object);
            on_gone(&object.name, object.namespace.as_deref());
        }
        // already logged and counted by the error policy
        Err(controller::Error::ReconcilerFailed(_, object)) => {
            debug!("Reconciliation of {} failed", object);
        }
        Err(controller::Error::QueueError(e)) => {
            warn!("⏳ Watch error, the watcher will back off and retry: {}", e);
        }
        Err(e) => error!("Controller stream error: {}", e),
    }
}
