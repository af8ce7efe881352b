//! Pulse Test Harness - Fault injection and end-to-end validation
//!
//! This crate provides:
//! - A scriptable in-memory remote with seeded fault injection
//! - Store fuzzing against a last-write-wins reference model
//! - An engine harness on a paused clock, with end-to-end scenarios

pub mod chaos;
pub mod remote;
pub mod state_fuzzer;
pub mod integration;

pub use chaos::*;
pub use remote::*;
pub use state_fuzzer::*;
pub use integration::*;
