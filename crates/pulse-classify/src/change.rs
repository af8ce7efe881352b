//! Change classifier - estimate record to derived display attributes
//!
//! Two questions are kept apart:
//! - how to render a record (pure function of the current record and
//!   the highlight/selection flags)
//! - whether it changed (comparison against the previous record)
//!
//! Neither starts timers; the caller decides what to do with `changed`.

use pulse_core::{DisplayTuning, EstimateRecord};

/// Human-readable classes, low to high, over the normalised domain
const LEAN_LABELS: [&str; 5] = ["Strong low", "Lean low", "Toss-up", "Lean high", "Strong high"];

/// Label used while an estimate is held back by the k-anonymity gate
pub const PRIOR_ONLY_LABEL: &str = "Prior only";

/// Render-time flags that override the record-derived attributes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisplayFlags {
    pub highlighted: bool,
    pub selected: bool,
}

impl DisplayFlags {
    pub fn highlighted(highlighted: bool) -> Self {
        DisplayFlags {
            highlighted,
            selected: false,
        }
    }
}

/// Visual attributes for one entity
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedAttributes {
    pub color: String,
    /// Colour band index (0 = lowest); `None` while flashing
    pub band: Option<usize>,
    pub opacity: f64,
    /// Border weight / glow
    pub emphasis: f64,
    pub label: &'static str,
}

/// Full classifier output
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub attributes: DerivedAttributes,
    /// True on first sighting or a material change
    pub changed: bool,
}

/// Change classifier
#[derive(Clone, Debug, Default)]
pub struct ChangeClassifier {
    tuning: DisplayTuning,
}

impl ChangeClassifier {
    /// Create a classifier with the default tuning
    pub fn new() -> Self {
        Self::with_tuning(DisplayTuning::default())
    }

    pub fn with_tuning(tuning: DisplayTuning) -> Self {
        ChangeClassifier { tuning }
    }

    pub fn tuning(&self) -> &DisplayTuning {
        &self.tuning
    }

    /// Classify a record against its predecessor
    pub fn classify(
        &self,
        record: &EstimateRecord,
        previous: Option<&EstimateRecord>,
        flags: DisplayFlags,
    ) -> Classification {
        Classification {
            attributes: self.derive(record, flags),
            changed: Self::changed(record, previous),
        }
    }

    /// Material-change verdict: first sighting, or a different effective
    /// count or posterior mean
    pub fn changed(record: &EstimateRecord, previous: Option<&EstimateRecord>) -> bool {
        match previous {
            None => true,
            Some(prev) => {
                record.effective_count != prev.effective_count
                    || record.posterior_mean != prev.posterior_mean
            }
        }
    }

    /// Derived attributes for the current record
    pub fn derive(&self, record: &EstimateRecord, flags: DisplayFlags) -> DerivedAttributes {
        let mean = record.displayed_mean();
        let (color, band) = if flags.highlighted {
            (self.tuning.flash_color.clone(), None)
        } else {
            let band = self.band(mean);
            (self.tuning.palette[band].clone(), Some(band))
        };

        DerivedAttributes {
            color,
            band,
            opacity: self.opacity(record, flags.highlighted),
            emphasis: self.emphasis(record, flags),
            label: self.label(record),
        }
    }

    /// Position of `mean` within the display domain, clamped to 0..=1
    pub fn normalize(&self, mean: f64) -> f64 {
        let span = self.tuning.domain_high - self.tuning.domain_low;
        ((mean - self.tuning.domain_low) / span).clamp(0.0, 1.0)
    }

    /// Colour band for a displayed mean. Monotonic non-decreasing in `mean`.
    pub fn band(&self, mean: f64) -> usize {
        let bands = self.tuning.palette.len();
        let position = (self.normalize(mean) * bands as f64).floor() as usize;
        position.min(bands - 1)
    }

    /// Opacity: fixed while hidden, rising with effective count once
    /// visible, capped
    pub fn opacity(&self, record: &EstimateRecord, highlighted: bool) -> f64 {
        let t = &self.tuning;
        if highlighted {
            return t.highlighted_opacity;
        }
        if !record.visible {
            return t.hidden_opacity;
        }
        let fill = (record.effective_count / t.opacity_saturation_count).clamp(0.0, 1.0);
        let span = t.opacity_cap - t.visible_opacity_floor;
        (t.visible_opacity_floor + span * fill).min(t.opacity_cap)
    }

    /// Emphasis: step function of the displayed mean, boosted when
    /// visible, maximal when highlighted or selected
    pub fn emphasis(&self, record: &EstimateRecord, flags: DisplayFlags) -> f64 {
        let t = &self.tuning;
        if flags.highlighted || flags.selected {
            return t.emphasis_max;
        }
        let mean = record.displayed_mean();
        let base = t
            .emphasis_steps
            .iter()
            .rev()
            .find(|(bound, _)| mean >= *bound)
            .or_else(|| t.emphasis_steps.first())
            .map(|(_, weight)| *weight)
            .unwrap_or(1.0);
        let boosted = if record.visible {
            base + t.emphasis_visible_boost
        } else {
            base
        };
        boosted.min(t.emphasis_max)
    }

    /// Human-readable classification
    pub fn label(&self, record: &EstimateRecord) -> &'static str {
        if !record.visible {
            return PRIOR_ONLY_LABEL;
        }
        let scaled = self.normalize(record.displayed_mean()) * LEAN_LABELS.len() as f64;
        let idx = scaled.floor() as usize;
        LEAN_LABELS[idx.min(LEAN_LABELS.len() - 1)]
    }
}
