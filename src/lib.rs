//! # SOPS Operator
//!
//! A Kubernetes operator that turns SOPS-encrypted `SopsSecret` and
//! `GlobalSopsSecret` resources into plain `Secret`s, decrypting them with
//! key material read from cluster secrets selected by `SopsProvider`s.
//!
//! ## Overview
//!
//! 1. **Providers** select key-bearing secrets (PGP, age, Vault, AWS KMS,
//!    Azure Key Vault, GCP KMS credentials) and report which of them load.
//! 2. **Encrypted secrets** are matched against providers; the keys of every
//!    matching provider are loaded into a per-pass decryption session.
//! 3. Each declared item is decrypted and written as a `Secret` owned by the
//!    resource that declared it. Items removed from the spec are deleted.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod decryptor;
pub mod observability;
pub mod runtime;
pub mod selector;
pub mod server;
pub mod store;
