//! # Decryptor
//!
//! Key material loading and SOPS decryption.
//!
//! - [`keys`] classifies and parses the entries of key secrets
//! - [`backend`] dispatches a decryption to the key backends that can serve it
//! - [`engine`] is the boundary to the `sops` implementation
//! - [`session`] ties them together for one reconciliation pass

pub mod backend;
pub mod engine;
pub mod error;
pub mod gnupg;
pub mod keys;
pub mod session;

pub use backend::{EngineCredentials, KeyBackend, KeyKind, KeyService, KeyServiceBuilder, MasterKey};
pub use engine::{DocumentFormat, SopsCli, SopsEngine};
pub use error::{
    classify_sops_error, CredentialError, DecryptError, DecryptionFailureReason, KeyMaterialError,
};
pub use session::{DecryptedItem, DecryptionSession};
