//! # Custom Resource Definitions
//!
//! CRD types for the SOPS operator.
//!
//! - [`SopsProvider`] (cluster-scoped) ties key secrets to the encrypted
//!   secrets they may decrypt.
//! - [`SopsSecret`] (namespaced) and [`GlobalSopsSecret`] (cluster-scoped)
//!   carry encrypted secret items plus their SOPS envelope.
//!
//! Both secret kinds implement [`SopsResource`], which is all the secret
//! reconciler needs to know about them.

pub mod global;
pub mod origin;
pub mod provider;
pub mod secret;
pub mod sops;
pub mod status;

pub use global::{GlobalSopsSecret, GlobalSopsSecretItem, GlobalSopsSecretSpec};
pub use origin::{ObjectKey, Origin};
pub use provider::{SopsProvider, SopsProviderSpec};
pub use secret::{SecretMetadata, SopsSecret, SopsSecretItem, SopsSecretSpec};
pub use sops::SopsMetadata;
pub use status::{
    Condition, ConditionReason, KeyItemStatus, SecretItemStatus, SopsProviderStatus,
    SopsSecretStatus, SECRETS_FAILED_MESSAGE, SUCCEEDED_MESSAGE,
};

use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A secret item paired with the namespace it is materialized in
#[derive(Debug, Clone, Copy)]
pub struct SecretTarget<'a> {
    pub namespace: &'a str,
    pub item: &'a SopsSecretItem,
}

/// Behaviour shared by the namespaced and cluster-scoped encrypted secret kinds
pub trait SopsResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The SOPS envelope; absence means the resource is not encrypted
    fn sops(&self) -> Option<&SopsMetadata>;

    fn secret_metadata(&self) -> &SecretMetadata;

    /// Declared items in declaration order, with their target namespace
    fn targets(&self) -> Vec<SecretTarget<'_>>;

    fn status(&self) -> Option<&SopsSecretStatus>;

    fn status_mut(&mut self) -> &mut Option<SopsSecretStatus>;
}

impl SopsResource for SopsSecret {
    fn sops(&self) -> Option<&SopsMetadata> {
        self.sops.as_ref()
    }

    fn secret_metadata(&self) -> &SecretMetadata {
        &self.spec.metadata
    }

    fn targets(&self) -> Vec<SecretTarget<'_>> {
        let namespace = self.metadata.namespace.as_deref().unwrap_or("default");
        self.spec
            .secrets
            .iter()
            .map(|item| SecretTarget { namespace, item })
            .collect()
    }

    fn status(&self) -> Option<&SopsSecretStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<SopsSecretStatus> {
        &mut self.status
    }
}

impl SopsResource for GlobalSopsSecret {
    fn sops(&self) -> Option<&SopsMetadata> {
        self.sops.as_ref()
    }

    fn secret_metadata(&self) -> &SecretMetadata {
        &self.spec.metadata
    }

    fn targets(&self) -> Vec<SecretTarget<'_>> {
        self.spec
            .secrets
            .iter()
            .map(|global| SecretTarget {
                namespace: global.namespace.as_str(),
                item: &global.item,
            })
            .collect()
    }

    fn status(&self) -> Option<&SopsSecretStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut Option<SopsSecretStatus> {
        &mut self.status
    }
}
