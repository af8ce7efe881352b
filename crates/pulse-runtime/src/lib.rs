//! Pulse Runtime - Engine facade over the reconciliation core
//!
//! This crate provides:
//! - `Engine`: partition switching, derived state, selection, signal
//!   intake and teardown
//! - JSON configuration with humantime durations
//! - Tracing initialization

pub mod config;
pub mod engine;
pub mod telemetry;

pub use config::*;
pub use engine::*;
pub use telemetry::*;
