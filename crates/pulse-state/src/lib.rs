//! Pulse State Engine - Local mirror of the remote estimate store
//!
//! This crate implements:
//! - The entity store (copy-on-read snapshots, partition epochs)
//! - The reconciliation pipeline (validate, merge, detect change)
//! - Highlight windows with single-expiry semantics
//! - The bounded event log

pub mod store;
pub mod reconcile;
pub mod highlight;
pub mod log;

pub use store::*;
pub use reconcile::*;
pub use highlight::*;
pub use log::*;
