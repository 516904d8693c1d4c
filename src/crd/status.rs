//! # Status and Conditions
//!
//! Status types shared by every managed resource, and the small Ready/NotReady
//! condition state machine attached to resources and to each per-item entry.
//!
//! Per-item lists are kept as identity-keyed collections: every entry is
//! addressed by its [`ObjectKey`], updates replace in place, and garbage
//! collection is a set difference against the identities touched in a pass.
//!
//! Status is written as a merge patch, so every clearable field is always
//! serialized: an empty list or `null` clears the stored value, an absent
//! key would keep it.

use crate::crd::origin::{ObjectKey, Origin};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The only condition type published by the operator
pub const READY_CONDITION: &str = "Ready";

/// Default message of a successful reconciliation
pub const SUCCEEDED_MESSAGE: &str = "Reconciliation succeeded";

/// Aggregate message when one or more secret items failed
pub const SECRETS_FAILED_MESSAGE: &str = "Secret reconciliation failed";

/// Reason codes carried by conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionReason {
    /// Reconciled successfully
    Loaded,
    /// Generic failure
    Failed,
    /// No usable decryption provider or key, or decrypting an item failed
    DecryptionFailure,
    /// The resource carries no SOPS envelope
    NotSopsEncrypted,
    /// Writing the plaintext secret to the cluster failed
    ReplicationFailure,
    /// A secret with the target name exists and belongs to someone else
    OwnershipConflict,
    /// A provider selected no key secrets
    NoKeySecrets,
}

impl ConditionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionReason::Loaded => "Loaded",
            ConditionReason::Failed => "Failed",
            ConditionReason::DecryptionFailure => "DecryptionFailure",
            ConditionReason::NotSopsEncrypted => "NotSopsEncrypted",
            ConditionReason::ReplicationFailure => "ReplicationFailure",
            ConditionReason::OwnershipConflict => "OwnershipConflict",
            ConditionReason::NoKeySecrets => "NoKeySecrets",
        }
    }
}

/// Condition represents the latest observation of a resource or item
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, always `Ready`
    pub r#type: String,
    /// Status of the condition (True, False)
    pub status: String,
    /// Generation of the resource the condition was computed for
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Machine readable reason
    #[serde(default)]
    pub reason: String,
    /// Human readable message
    #[serde(default)]
    pub message: String,
    /// Last time the status flipped (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn ready(generation: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            r#type: READY_CONDITION.to_string(),
            status: "True".to_string(),
            observed_generation: generation,
            reason: ConditionReason::Loaded.as_str().to_string(),
            message: message.into(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn not_ready(
        generation: Option<i64>,
        reason: ConditionReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: READY_CONDITION.to_string(),
            status: "False".to_string(),
            observed_generation: generation,
            reason: reason.as_str().to_string(),
            message: message.into(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == "True"
    }

    /// Keep the previous transition time when the status did not flip.
    #[must_use]
    pub fn since(mut self, previous: Option<&Condition>) -> Self {
        if let Some(previous) = previous {
            if previous.status == self.status && previous.last_transition_time.is_some() {
                self.last_transition_time = previous.last_transition_time.clone();
            }
        }
        self
    }
}

/// Readiness of one raw key-bearing secret tracked by a provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeyItemStatus {
    #[serde(flatten)]
    pub origin: Origin,
    pub condition: Condition,
}

/// Status of a SopsProvider
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SopsProviderStatus {
    /// Number of key secrets tracked
    #[serde(default)]
    pub size: u32,
    /// Key secrets selected by this provider
    #[serde(default)]
    pub providers: Vec<KeyItemStatus>,
    /// Aggregate condition
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl SopsProviderStatus {
    pub fn get(&self, key: &ObjectKey) -> Option<&KeyItemStatus> {
        self.providers.iter().find(|item| &item.origin.key() == key)
    }

    /// Add or replace the entry with the same identity.
    pub fn upsert(&mut self, status: KeyItemStatus) {
        let key = status.origin.key();
        match self.providers.iter_mut().find(|item| item.origin.key() == key) {
            Some(existing) => *existing = status,
            None => self.providers.push(status),
        }
        self.update_size();
    }

    /// Drop every entry whose identity was not selected, returning the removed identities.
    pub fn retain_selected(&mut self, selected: &BTreeSet<ObjectKey>) -> Vec<ObjectKey> {
        let mut removed = Vec::new();
        self.providers.retain(|item| {
            let key = item.origin.key();
            let keep = selected.contains(&key);
            if !keep {
                removed.push(key);
            }
            keep
        });
        self.update_size();
        removed
    }

    /// Key items whose last validation succeeded
    pub fn ready_keys(&self) -> impl Iterator<Item = &KeyItemStatus> {
        self.providers.iter().filter(|item| item.condition.is_ready())
    }

    fn update_size(&mut self) {
        self.size = u32::try_from(self.providers.len()).unwrap_or(u32::MAX);
    }
}

/// Status of one materialized plaintext secret
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretItemStatus {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub condition: Condition,
}

impl SecretItemStatus {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::namespaced(&self.namespace, &self.name)
    }
}

/// Status of a SopsSecret or GlobalSopsSecret
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SopsSecretStatus {
    /// Number of materialized secrets tracked
    #[serde(default)]
    pub size: u32,
    /// One entry per materialized secret
    #[serde(default)]
    pub secrets: Vec<SecretItemStatus>,
    /// Providers whose keys were offered for decryption
    #[serde(default)]
    pub providers: Vec<Origin>,
    /// Aggregate condition
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl SopsSecretStatus {
    pub fn get(&self, key: &ObjectKey) -> Option<&SecretItemStatus> {
        self.secrets.iter().find(|item| &item.key() == key)
    }

    /// Add or replace the entry with the same identity.
    pub fn upsert(&mut self, status: SecretItemStatus) {
        let key = status.key();
        match self.secrets.iter_mut().find(|item| item.key() == key) {
            Some(existing) => *existing = status,
            None => self.secrets.push(status),
        }
        self.update_size();
    }

    pub fn remove(&mut self, key: &ObjectKey) {
        self.secrets.retain(|item| &item.key() != key);
        self.update_size();
    }

    /// Identities present in status but not selected in this pass
    pub fn unselected(&self, selected: &BTreeSet<ObjectKey>) -> Vec<ObjectKey> {
        self.secrets
            .iter()
            .map(SecretItemStatus::key)
            .filter(|key| !selected.contains(key))
            .collect()
    }

    fn update_size(&mut self) {
        self.size = u32::try_from(self.secrets.len()).unwrap_or(u32::MAX);
    }
}
