//! Error types for the precinct engine

use thiserror::Error;

use crate::PartitionKey;

/// Core engine errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PulseError {
    // Transient network errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Full-state fetch failed for partition {partition}: {reason}")]
    FetchFailed { partition: PartitionKey, reason: String },

    #[error("Push subscription failed for partition {partition}: {reason}")]
    SubscribeFailed { partition: PartitionKey, reason: String },

    #[error("Channel closed")]
    ChannelClosed,

    // Record errors
    #[error("Stale partition: record for {got}, active is {active}")]
    StalePartition { active: PartitionKey, got: PartitionKey },

    #[error("Malformed record: {field} {problem}")]
    MalformedRecord { field: &'static str, problem: &'static str },

    #[error("Unknown {scale} level: {value}")]
    UnknownLevel { scale: &'static str, value: String },

    // Intake errors
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PulseError {
    /// Whether the sync loop recovers from this error by retrying on the
    /// next poll tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PulseError::Transport(_)
                | PulseError::FetchFailed { .. }
                | PulseError::SubscribeFailed { .. }
                | PulseError::ChannelClosed
        )
    }

    pub(crate) fn missing(field: &'static str) -> Self {
        PulseError::MalformedRecord {
            field,
            problem: "is missing",
        }
    }

    pub(crate) fn non_finite(field: &'static str) -> Self {
        PulseError::MalformedRecord {
            field,
            problem: "is not a finite number",
        }
    }
}

/// Result type for engine operations
pub type PulseResult<T> = Result<T, PulseError>;
