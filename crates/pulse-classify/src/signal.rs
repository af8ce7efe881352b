//! Signal classifier - raw observation to compact categorical signal
//!
//! Direction comes from the observation itself: weighted ordinal scores,
//! thresholded. Impact comes from context: how far the target entity's
//! divergence score already sits from zero when the observation arrives.

use pulse_core::{
    ClassifiedSignal, Direction, EntityDirectory, EstimateRecord, Impact, RawObservation, SignalId,
    SignalTuning,
};

/// Signal classifier
#[derive(Clone, Debug, Default)]
pub struct SignalClassifier {
    tuning: SignalTuning,
}

impl SignalClassifier {
    /// Create a classifier with the default tuning
    pub fn new() -> Self {
        Self::with_tuning(SignalTuning::default())
    }

    pub fn with_tuning(tuning: SignalTuning) -> Self {
        SignalClassifier { tuning }
    }

    pub fn tuning(&self) -> &SignalTuning {
        &self.tuning
    }

    /// Weighted combination of the ordinal scores
    pub fn combined_score(&self, obs: &RawObservation) -> f64 {
        let t = &self.tuning;
        t.primary_weight * t.primary_scores[obs.primary.ordinal()]
            + t.secondary_weight * t.secondary_scores[obs.secondary.ordinal()]
            + t.tertiary_weight * t.tertiary_scores[obs.tertiary.ordinal()]
    }

    pub fn direction(&self, obs: &RawObservation) -> Direction {
        let score = self.combined_score(obs);
        if score >= self.tuning.direction_threshold {
            Direction::Higher
        } else if score <= -self.tuning.direction_threshold {
            Direction::Lower
        } else {
            Direction::Same
        }
    }

    /// Impact from the entity's current divergence score. Unknown entities
    /// and records without a score count as unsurprising.
    pub fn impact(&self, divergence_z: Option<f64>) -> Impact {
        let z = divergence_z.map(f64::abs).unwrap_or(0.0);
        if z >= self.tuning.large_impact_z {
            Impact::Large
        } else if z >= self.tuning.medium_impact_z {
            Impact::Medium
        } else {
            Impact::Small
        }
    }

    /// Illustrative shift in the estimate's native units
    pub fn estimated_shift(&self, obs: &RawObservation) -> f64 {
        self.tuning.shift_scale * self.combined_score(obs)
    }

    /// Classify one observation. `current` is the target entity's record
    /// at observation time, if the store has one.
    pub fn classify(
        &self,
        id: SignalId,
        obs: &RawObservation,
        current: Option<&EstimateRecord>,
        directory: &EntityDirectory,
    ) -> ClassifiedSignal {
        let direction = self.direction(obs);
        let impact = self.impact(current.and_then(|r| r.divergence_z));
        let estimated_shift = self.estimated_shift(obs);
        let label = format!(
            "{} {} {} ({} impact, {:+.1} pts)",
            directory.name_of(&obs.entity_key),
            direction.arrow(),
            direction,
            impact,
            estimated_shift * 100.0,
        );

        ClassifiedSignal {
            id,
            timestamp: obs.submitted_at,
            entity_key: obs.entity_key.clone(),
            label,
            direction,
            impact,
            estimated_shift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{CertaintyLevel, ComparisonLevel, ShareLevel};

    fn obs(primary: &str, secondary: &str) -> RawObservation {
        RawObservation::parse("P1", primary, secondary, "neutral").unwrap()
    }

    #[test]
    fn test_extremes_classify_by_direction() {
        let classifier = SignalClassifier::new();
        assert_eq!(classifier.direction(&obs("almost_all", "much_higher")), Direction::Higher);
        assert_eq!(classifier.direction(&obs("almost_none", "much_lower")), Direction::Lower);
        assert_eq!(classifier.direction(&obs("about_half", "about_same")), Direction::Same);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let classifier = SignalClassifier::new();
        // 0 * 1.0 + 1 * 0.5 sits exactly on the threshold
        assert_eq!(classifier.direction(&obs("about_half", "higher")), Direction::Higher);
        assert_eq!(classifier.direction(&obs("about_half", "lower")), Direction::Lower);
        // half-weight secondary at full tilt only cancels the primary
        assert_eq!(classifier.direction(&obs("few", "much_higher")), Direction::Same);
    }

    #[test]
    fn test_tertiary_has_no_default_weight() {
        let classifier = SignalClassifier::new();
        let observe = |certainty| {
            RawObservation::new("P1", ShareLevel::Most, ComparisonLevel::Lower, certainty)
        };
        let a = observe(CertaintyLevel::VeryUnsure);
        let b = observe(CertaintyLevel::VerySure);
        assert_eq!(classifier.combined_score(&a), classifier.combined_score(&b));
    }

    #[test]
    fn test_impact_reflects_context() {
        let classifier = SignalClassifier::new();
        assert_eq!(classifier.impact(None), Impact::Small);
        assert_eq!(classifier.impact(Some(0.5)), Impact::Small);
        assert_eq!(classifier.impact(Some(-0.75)), Impact::Medium);
        assert_eq!(classifier.impact(Some(1.5)), Impact::Large);
        assert_eq!(classifier.impact(Some(-3.0)), Impact::Large);
    }

    #[test]
    fn test_classify_builds_signal() {
        let classifier = SignalClassifier::new();
        let directory = EntityDirectory::from_pairs([("P1", "Northside 1")]);
        let record = EstimateRecord::prior("P1", "A", 0.5).with_divergence(2.0);
        let observation = obs("almost_all", "much_higher");
        let signal = classifier.classify(SignalId::new(7), &observation, Some(&record), &directory);

        assert_eq!(signal.id, SignalId::new(7));
        assert_eq!(signal.direction, Direction::Higher);
        assert_eq!(signal.impact, Impact::Large);
        assert!((signal.estimated_shift - 0.03).abs() < 1e-9);
        assert_eq!(signal.timestamp, observation.submitted_at);
        assert!(signal.label.starts_with("Northside 1"));
    }

    #[test]
    fn test_shift_is_antisymmetric() {
        let classifier = SignalClassifier::new();
        let up = classifier.estimated_shift(&obs("most", "higher"));
        let down = classifier.estimated_shift(&obs("few", "lower"));
        assert!((up + down).abs() < 1e-12);
    }
}
