//! Pulse Core - Fundamental types for the live precinct map
//!
//! This crate defines the types shared by every other crate:
//! - Identifiers (EntityKey, PartitionKey, SignalId, StoreEpoch)
//! - Estimate records and their wire form
//! - Raw observations and classified signals
//! - Tuning tables and the entity directory

pub mod id;
pub mod record;
pub mod observation;
pub mod signal;
pub mod tuning;
pub mod directory;
pub mod error;

pub use id::*;
pub use record::*;
pub use observation::*;
pub use signal::*;
pub use tuning::*;
pub use directory::*;
pub use error::*;
