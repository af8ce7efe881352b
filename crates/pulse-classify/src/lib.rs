//! Pulse Classify - Deterministic classifiers with no I/O and no timers
//!
//! This crate implements:
//! - Change classification: estimate record to colour, opacity, emphasis
//!   and label, plus the material-change verdict
//! - Signal classification: raw observation to direction, impact and
//!   estimated shift

pub mod change;
pub mod signal;

pub use change::*;
pub use signal::*;
