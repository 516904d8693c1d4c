//! # Metrics Module
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup and registration
//! - `controller_metrics` - Reconciliation, decryption and requeue counters
//! - `condition_metrics` - Per-resource condition gauges

pub mod condition_metrics;
pub mod controller_metrics;
pub mod registry;

pub use condition_metrics::*;
pub use controller_metrics::*;
pub use registry::*;
