//! # Condition Metrics
//!
//! One gauge series per managed resource and condition status. The series
//! of the current status is 1, the other is 0; both are removed when the
//! resource is deleted.

use crate::crd::Condition;
use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::GaugeVec;
use std::sync::LazyLock;
use tracing::debug;

const STATUSES: [&str; 2] = ["True", "False"];

static PROVIDER_CONDITION: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        prometheus::Opts::new(
            "sops_provider_condition",
            "Ready condition of each SopsProvider",
        ),
        &["name", "status"],
    )
    .expect("Failed to create PROVIDER_CONDITION metric - this should never happen")
});

static SECRET_CONDITION: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        prometheus::Opts::new(
            "sops_secret_condition",
            "Ready condition of each SopsSecret and GlobalSopsSecret",
        ),
        &["name", "namespace", "status"],
    )
    .expect("Failed to create SECRET_CONDITION metric - this should never happen")
});

pub(crate) fn register_condition_metrics() -> Result<()> {
    REGISTRY.register(Box::new(PROVIDER_CONDITION.clone()))?;
    REGISTRY.register(Box::new(SECRET_CONDITION.clone()))?;
    Ok(())
}

pub fn record_provider_condition(name: &str, condition: &Condition) {
    for status in STATUSES {
        let value = if condition.status == status { 1.0 } else { 0.0 };
        PROVIDER_CONDITION
            .with_label_values(&[name, status])
            .set(value);
    }
}

pub fn delete_provider_condition(name: &str) {
    for status in STATUSES {
        if PROVIDER_CONDITION
            .remove_label_values(&[name, status])
            .is_err()
        {
            debug!("No condition series for provider {} ({})", name, status);
        }
    }
}

/// Cluster-scoped secrets are recorded with an empty namespace
pub fn record_secret_condition(name: &str, namespace: &str, condition: &Condition) {
    for status in STATUSES {
        let value = if condition.status == status { 1.0 } else { 0.0 };
        SECRET_CONDITION
            .with_label_values(&[name, namespace, status])
            .set(value);
    }
}

pub fn delete_secret_condition(name: &str, namespace: &str) {
    for status in STATUSES {
        if SECRET_CONDITION
            .remove_label_values(&[name, namespace, status])
            .is_err()
        {
            debug!(
                "No condition series for secret {}/{} ({})",
                namespace, name, status
            );
        }
    }
}
