//! # Controller Configuration
//!
//! Reconciler behaviour settings loaded from environment variables.

use crate::config::{env_var_optional, env_var_or_default};
use crate::constants::{
    DEFAULT_CONTROLLER_NAME, DEFAULT_FAILED_SECRETS_INTERVAL_SECS,
    DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Controller name, used as field manager and in log output
    pub controller_name: String,
    /// Publish the matched providers into the status of encrypted secrets
    pub enable_status: bool,
    /// Requeue interval after one or more secret items failed (seconds)
    pub failed_secrets_interval_secs: u64,
    /// Requeue interval after a reconciliation error (seconds)
    pub reconciliation_error_requeue_secs: u64,
    /// Concurrent reconciliations per controller
    pub max_concurrent_reconciliations: u16,
    /// Explicit `sops` binary; located on `PATH` when unset
    pub sops_binary: Option<PathBuf>,
    /// Explicit `gpg` binary; located on `PATH` when unset
    pub gpg_binary: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            enable_status: true,
            failed_secrets_interval_secs: DEFAULT_FAILED_SECRETS_INTERVAL_SECS,
            reconciliation_error_requeue_secs: DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            sops_binary: None,
            gpg_binary: None,
            log_format: LogFormat::Text,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            controller_name: env_var_or_default(
                "CONTROLLER_NAME",
                DEFAULT_CONTROLLER_NAME.to_string(),
            ),
            enable_status: env_var_or_default("ENABLE_STATUS", true),
            failed_secrets_interval_secs: env_var_or_default(
                "FAILED_SECRETS_INTERVAL_SECS",
                DEFAULT_FAILED_SECRETS_INTERVAL_SECS,
            ),
            reconciliation_error_requeue_secs: env_var_or_default(
                "RECONCILIATION_ERROR_REQUEUE_SECS",
                DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            sops_binary: env_var_optional("SOPS_BINARY").map(PathBuf::from),
            gpg_binary: env_var_optional("GPG_BINARY").map(PathBuf::from),
            log_format: env_var_or_default("LOG_FORMAT", LogFormat::Text),
        }
    }

    pub fn failed_secrets_interval(&self) -> Duration {
        Duration::from_secs(self.failed_secrets_interval_secs)
    }

    pub fn reconciliation_error_requeue(&self) -> Duration {
        Duration::from_secs(self.reconciliation_error_requeue_secs)
    }
}
