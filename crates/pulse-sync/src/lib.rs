//! Pulse Sync - Keeps the entity store live for one partition
//!
//! This crate provides:
//! - The remote read / change-feed / intake interface
//! - Explicit subscription handles with a single close
//! - The sync channel: full fetch, push subscription, polling fallback

pub mod remote;
pub mod channel;

pub use remote::*;
pub use channel::*;
