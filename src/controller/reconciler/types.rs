//! # Reconciler Types
//!
//! Shared context, error and outcome types for the reconcilers.

use crate::config::ControllerConfig;
use crate::crd::ObjectKey;
use crate::decryptor::{DecryptionSession, SopsEngine};
use crate::observability::metrics;
use crate::store::{ClusterStore, StoreError};
use kube_runtime::controller::Action;
use std::sync::Arc;
use thiserror::Error;

/// Dependencies handed to every reconciliation
pub struct Context {
    pub store: Arc<dyn ClusterStore>,
    pub engine: Arc<dyn SopsEngine>,
    pub config: ControllerConfig,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        engine: Arc<dyn SopsEngine>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    /// Fresh decryption session for one pass
    pub fn session(&self) -> DecryptionSession {
        DecryptionSession::new(Arc::clone(&self.engine)).with_gpg_binary(self.config.gpg_binary.clone())
    }
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("status of {kind} {key} still conflicted after {attempts} attempts")]
    StatusConflict {
        kind: &'static str,
        key: ObjectKey,
        attempts: u32,
    },
}

/// How a pass ended; decides when the resource is looked at again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything declared is in sync
    Synced,
    /// The resource cannot be processed until something it depends on changes
    PolicyFailure,
    /// Some items failed; they are retried on a timer
    ItemsFailed,
}

impl Outcome {
    pub fn action(self, config: &ControllerConfig) -> Action {
        match self {
            Outcome::Synced => Action::await_change(),
            Outcome::PolicyFailure => {
                metrics::increment_requeues_total("policy-failure");
                Action::await_change()
            }
            Outcome::ItemsFailed => {
                metrics::increment_requeues_total("failed-secrets");
                Action::requeue(config.failed_secrets_interval())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_outcome_actions() {
        let config = ControllerConfig::default();
        assert_eq!(Outcome::Synced.action(&config), Action::await_change());
        assert_eq!(Outcome::PolicyFailure.action(&config), Action::await_change());
        assert_eq!(
            Outcome::ItemsFailed.action(&config),
            Action::requeue(Duration::from_secs(60))
        );
    }
}
