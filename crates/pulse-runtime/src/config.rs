//! Engine configuration
//!
//! Loaded from JSON. Durations are humantime strings ("2s", "250ms").
//! Every field has a default so partial documents are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use pulse_core::{DisplayTuning, PulseError, PulseResult, SignalTuning};
use pulse_state::{DEFAULT_HIGHLIGHT_WINDOW, DEFAULT_LOG_CAPACITY};
use pulse_sync::{SyncConfig, DEFAULT_POLL_INTERVAL};

use crate::TelemetryConfig;

/// Default highlight sweep period
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback poll period while the push channel is down
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
    /// How long a changed entity stays highlighted
    #[serde(with = "humantime_duration")]
    pub highlight_window: Duration,
    /// How often expired highlights are swept
    #[serde(with = "humantime_duration")]
    pub sweep_interval: Duration,
    /// Signals retained in the event log
    pub log_capacity: usize,
    pub display: DisplayTuning,
    pub signals: SignalTuning,
    pub telemetry: TelemetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            highlight_window: DEFAULT_HIGHLIGHT_WINDOW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            log_capacity: DEFAULT_LOG_CAPACITY,
            display: DisplayTuning::default(),
            signals: SignalTuning::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> PulseResult<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| PulseError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PulseResult<()> {
        if self.poll_interval.is_zero() {
            return Err(PulseError::InvalidConfig("poll_interval must be non-zero".into()));
        }
        if self.highlight_window.is_zero() {
            return Err(PulseError::InvalidConfig(
                "highlight_window must be non-zero".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(PulseError::InvalidConfig("sweep_interval must be non-zero".into()));
        }
        if self.log_capacity == 0 {
            return Err(PulseError::InvalidConfig("log_capacity must be at least 1".into()));
        }
        self.display.validate()?;
        self.signals.validate()
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: self.poll_interval,
        }
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}
