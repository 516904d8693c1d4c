//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of every custom resource served by the operator
pub const API_GROUP: &str = "sops.microscaler.io";

/// API version of every custom resource served by the operator
pub const API_VERSION: &str = "v1alpha1";

/// Label marking a Secret as a source of decryption keys.
///
/// Only secrets carrying this label (with value `"true"`) are considered by
/// `SopsProvider` selectors, which bounds the listing cost.
pub const KEY_SECRET_LABEL: &str = "sops.microscaler.io/secret";

/// Value the key secret marker label must carry
pub const KEY_SECRET_LABEL_VALUE: &str = "true";

/// Default controller name, used as field manager and in log output
pub const DEFAULT_CONTROLLER_NAME: &str = "sops-operator";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval when the runtime receives a reconciliation error (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 30;

/// Default requeue interval when one or more secret items failed (seconds)
pub const DEFAULT_FAILED_SECRETS_INTERVAL_SECS: u64 = 60;

/// Default upper bound of concurrent reconciliations per controller
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Attempts made by the status write retry before giving up
pub const STATUS_RETRY_STEPS: u32 = 4;

/// First delay of the status write retry (milliseconds)
pub const STATUS_RETRY_INITIAL_MS: u64 = 10;

/// Growth factor of the status write retry delay
pub const STATUS_RETRY_FACTOR: u32 = 5;

/// Jitter applied to each status write retry delay (fraction of the delay)
pub const STATUS_RETRY_JITTER: f64 = 0.1;

/// Default secret type for materialized secrets
pub const DEFAULT_SECRET_TYPE: &str = "Opaque";
