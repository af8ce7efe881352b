//! Classified signals - compact categorical summaries of observations
//!
//! A signal is what the event log keeps:
//! - Direction: does the observation push the estimate higher or lower
//! - Impact: how surprising the target entity already is
//! - Estimated shift: illustrative, never fed back into the store

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityKey, SignalId};

/// Direction of an observation relative to the current estimate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Higher,
    Same,
    Lower,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Higher => "higher",
            Direction::Same => "same",
            Direction::Lower => "lower",
        }
    }

    /// Arrow glyph for compact log rendering
    pub fn arrow(self) -> char {
        match self {
            Direction::Higher => '↑',
            Direction::Same => '→',
            Direction::Lower => '↓',
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contextual impact, ordered small < medium < large
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    #[default]
    Small,
    Medium,
    Large,
}

impl Impact {
    pub fn as_str(self) -> &'static str {
        match self {
            Impact::Small => "small",
            Impact::Medium => "medium",
            Impact::Large => "large",
        }
    }
}

impl fmt::Display for Impact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event-log entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedSignal {
    pub id: SignalId,
    pub timestamp: DateTime<Utc>,
    pub entity_key: EntityKey,
    /// Human-readable line for the log view
    pub label: String,
    pub direction: Direction,
    pub impact: Impact,
    /// Shift in the estimate's native units
    pub estimated_shift: f64,
}
