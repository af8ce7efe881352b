//! Tuning tables
//!
//! Every threshold, weight and band used by the classifiers lives here as
//! data. The defaults are the values the live map ships with.

use serde::{Deserialize, Serialize};

use crate::{PulseError, PulseResult, DEFAULT_K_ANONYMITY};

/// Signal classification tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalTuning {
    /// Score for each primary (share) level, lowest first
    pub primary_scores: [f64; 5],
    /// Score for each secondary (comparison) level, lowest first
    pub secondary_scores: [f64; 5],
    /// Score for each tertiary (certainty) level, lowest first
    pub tertiary_scores: [f64; 5],
    pub primary_weight: f64,
    pub secondary_weight: f64,
    pub tertiary_weight: f64,
    /// |combined| at or above this is higher/lower, else same
    pub direction_threshold: f64,
    /// |divergence z| at or above this is a large impact
    pub large_impact_z: f64,
    /// |divergence z| at or above this is a medium impact
    pub medium_impact_z: f64,
    /// Native units per unit of combined score
    pub shift_scale: f64,
}

impl Default for SignalTuning {
    fn default() -> Self {
        SignalTuning {
            primary_scores: [-2.0, -1.0, 0.0, 1.0, 2.0],
            secondary_scores: [-2.0, -1.0, 0.0, 1.0, 2.0],
            tertiary_scores: [-2.0, -1.0, 0.0, 1.0, 2.0],
            primary_weight: 1.0,
            secondary_weight: 0.5,
            tertiary_weight: 0.0,
            direction_threshold: 0.5,
            large_impact_z: 1.5,
            medium_impact_z: 0.75,
            shift_scale: 0.01,
        }
    }
}

impl SignalTuning {
    pub fn validate(&self) -> PulseResult<()> {
        if !(self.direction_threshold > 0.0) {
            return Err(PulseError::InvalidConfig(
                "signals.direction_threshold must be positive".into(),
            ));
        }
        if !(self.medium_impact_z > 0.0 && self.medium_impact_z <= self.large_impact_z) {
            return Err(PulseError::InvalidConfig(
                "signals impact thresholds must satisfy 0 < medium <= large".into(),
            ));
        }
        Ok(())
    }
}

/// Derived display tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayTuning {
    /// Displayed means at or below this map to the first colour band
    pub domain_low: f64,
    /// Displayed means at or above this map to the last colour band
    pub domain_high: f64,
    /// Colour bands, low to high
    pub palette: Vec<String>,
    pub flash_color: String,
    pub hidden_opacity: f64,
    /// Opacity of a visible entity with zero effective count
    pub visible_opacity_floor: f64,
    pub opacity_cap: f64,
    pub highlighted_opacity: f64,
    /// Effective count at which visible opacity reaches the cap
    pub opacity_saturation_count: f64,
    /// Emphasis steps: (displayed mean lower bound, weight), ascending.
    /// Means below the first bound take the first weight.
    pub emphasis_steps: Vec<(f64, f64)>,
    pub emphasis_visible_boost: f64,
    pub emphasis_max: f64,
    pub k_anonymity: f64,
}

impl Default for DisplayTuning {
    fn default() -> Self {
        DisplayTuning {
            domain_low: 0.25,
            domain_high: 0.80,
            palette: [
                "#f7fbff", "#deebf7", "#c6dbef", "#9ecae1", "#6baed6", "#3182bd", "#08519c",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            flash_color: "#ffd400".into(),
            hidden_opacity: 0.55,
            visible_opacity_floor: 0.65,
            opacity_cap: 0.9,
            highlighted_opacity: 0.95,
            opacity_saturation_count: 50.0,
            emphasis_steps: vec![(0.0, 1.0), (0.4, 1.5), (0.55, 2.0), (0.7, 2.5)],
            emphasis_visible_boost: 0.5,
            emphasis_max: 4.0,
            k_anonymity: DEFAULT_K_ANONYMITY,
        }
    }
}

impl DisplayTuning {
    pub fn validate(&self) -> PulseResult<()> {
        if !(self.domain_low < self.domain_high) {
            return Err(PulseError::InvalidConfig(
                "display.domain_low must be below display.domain_high".into(),
            ));
        }
        if self.palette.is_empty() {
            return Err(PulseError::InvalidConfig("display.palette is empty".into()));
        }
        let opacities = [
            self.hidden_opacity,
            self.visible_opacity_floor,
            self.opacity_cap,
            self.highlighted_opacity,
        ];
        if opacities.iter().any(|o| !(0.0..=1.0).contains(o)) {
            return Err(PulseError::InvalidConfig("display opacities must lie in 0..=1".into()));
        }
        if self.visible_opacity_floor > self.opacity_cap {
            return Err(PulseError::InvalidConfig(
                "display.visible_opacity_floor exceeds display.opacity_cap".into(),
            ));
        }
        if !(self.opacity_saturation_count > 0.0) {
            return Err(PulseError::InvalidConfig(
                "display.opacity_saturation_count must be positive".into(),
            ));
        }
        let ascending = self.emphasis_steps.windows(2).all(|w| w[0].0 < w[1].0);
        if self.emphasis_steps.is_empty() || !ascending {
            return Err(PulseError::InvalidConfig(
                "display.emphasis_steps must be non-empty and strictly ascending".into(),
            ));
        }
        if self.k_anonymity < 0.0 {
            return Err(PulseError::InvalidConfig("display.k_anonymity is negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SignalTuning::default().validate().is_ok());
        assert!(DisplayTuning::default().validate().is_ok());
        assert!(DisplayTuning::default().palette.len() >= 6);
    }

    #[test]
    fn test_inverted_domain_rejected() {
        let tuning = DisplayTuning {
            domain_low: 0.8,
            domain_high: 0.25,
            ..DisplayTuning::default()
        };
        assert!(matches!(tuning.validate(), Err(PulseError::InvalidConfig(_))));
    }

    #[test]
    fn test_unordered_emphasis_rejected() {
        let tuning = DisplayTuning {
            emphasis_steps: vec![(0.5, 1.0), (0.4, 2.0)],
            ..DisplayTuning::default()
        };
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let tuning: SignalTuning = serde_json::from_str(r#"{"secondary_weight":0.25}"#).unwrap();
        assert_eq!(tuning.secondary_weight, 0.25);
        assert_eq!(tuning.primary_weight, 1.0);
    }
}
