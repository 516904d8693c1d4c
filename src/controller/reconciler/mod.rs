//! # Reconciler
//!
//! - `provider` - selects and validates the key secrets of a `SopsProvider`
//! - `secret` - decrypts, replicates and garbage-collects the items of
//!   `SopsSecret` and `GlobalSopsSecret` resources
//! - `replicate` - create-or-update of one owned plaintext secret
//! - `status` - conflict-safe status persistence
//! - `types` - shared context, errors and outcomes

pub mod provider;
pub mod replicate;
pub mod secret;
pub mod status;
pub mod types;

pub use provider::reconcile_provider;
pub use secret::reconcile_secret;
pub use status::{persist_status, retry_on_conflict, RetryBackoff};
pub use types::{Context, Outcome, ReconcilerError};
