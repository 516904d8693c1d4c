//! # Status Persistence
//!
//! Writes reconciled status back under optimistic concurrency.
//!
//! Every attempt re-reads the object, swaps in the freshly computed status
//! and writes it with the re-read `resourceVersion`. Conflicts are retried
//! with bounded exponential backoff; everything else fails immediately.

use crate::constants::{
    STATUS_RETRY_FACTOR, STATUS_RETRY_INITIAL_MS, STATUS_RETRY_JITTER, STATUS_RETRY_STEPS,
};
use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::ObjectKey;
use crate::store::{ClusterStore, StatusResource, StoreError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for conflicting writes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBackoff {
    pub steps: u32,
    pub initial: Duration,
    pub factor: u32,
    pub jitter: f64,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            steps: STATUS_RETRY_STEPS,
            initial: Duration::from_millis(STATUS_RETRY_INITIAL_MS),
            factor: STATUS_RETRY_FACTOR,
            jitter: STATUS_RETRY_JITTER,
        }
    }
}

impl RetryBackoff {
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::rng().random_range(0.0..=self.jitter);
        delay.mul_f64(1.0 + extra)
    }
}

/// Run `op` until it succeeds, fails with something other than a conflict,
/// or the backoff runs out of steps. Returns the last error on exhaustion.
pub async fn retry_on_conflict<T, F, Fut>(backoff: RetryBackoff, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = backoff.initial;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < backoff.steps => {
                let wait = backoff.jittered(delay);
                debug!(
                    "🔄 Conflict on attempt {}/{}: {} (retrying in {:?})",
                    attempt, backoff.steps, e, wait
                );
                tokio::time::sleep(wait).await;
                delay = delay.saturating_mul(backoff.factor);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Persist `status` onto the latest stored version of the object at `key`.
///
/// An object that no longer exists is not an error.
pub async fn persist_status<K, S>(
    store: &dyn ClusterStore,
    key: &ObjectKey,
    status: &S,
    backoff: RetryBackoff,
    apply: fn(&mut K, S),
) -> Result<(), ReconcilerError>
where
    K: StatusResource,
    S: Clone + Send + Sync,
{
    let result = retry_on_conflict(backoff, move || async move {
        let Some(mut latest) = K::fetch(store, key).await? else {
            debug!("{} {} is gone, skipping status update", K::KIND, key);
            return Ok(());
        };
        apply(&mut latest, status.clone());
        latest.write_status(store).await
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(StoreError::Conflict { .. }) => {
            warn!(
                "❌ Status of {} {} still conflicted after {} attempts",
                K::KIND,
                key,
                backoff.steps
            );
            Err(ReconcilerError::StatusConflict {
                kind: K::KIND,
                key: key.clone(),
                attempts: backoff.steps,
            })
        }
        Err(e) => Err(e.into()),
    }
}
