//! # Controller
//!
//! Reconcilers for the three resource kinds.

pub mod reconciler;
