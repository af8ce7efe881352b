//! Store Fuzzer - Randomized merge sequences against a reference model
//!
//! Tests:
//! - Last-write-wins by arrival
//! - Partition fencing (records for other partitions never land)
//! - Epoch fencing (writers from before a switch never land)
//! - Malformed records leave the store untouched

use std::collections::HashMap;
use std::sync::Arc;

use pulse_core::{EntityKey, PartitionKey, StoreEpoch, WireRecord};
use pulse_state::{EntityStore, HighlightScheduler, RecordResult, Reconciler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Distinct entity keys
    pub entity_count: usize,
    /// Distinct partitions
    pub partition_count: usize,
    /// Records to generate
    pub record_count: usize,
    /// Probability of a partition switch before a record
    pub switch_prob: f64,
    /// Probability that a record is missing a required field
    pub malformed_prob: f64,
    /// Probability that a record is written by a superseded channel
    pub stale_writer_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            entity_count: 20,
            partition_count: 3,
            record_count: 1000,
            switch_prob: 0.02,
            malformed_prob: 0.05,
            stale_writer_prob: 0.1,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            entity_count: 5,
            partition_count: 2,
            record_count: 100,
            switch_prob: 0.05,
            malformed_prob: 0.05,
            stale_writer_prob: 0.1,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            entity_count: 200,
            partition_count: 5,
            record_count: 20_000,
            switch_prob: 0.01,
            malformed_prob: 0.1,
            stale_writer_prob: 0.2,
            seed: 42,
        }
    }
}

/// Store fuzzer
pub struct StateFuzzer {
    config: FuzzerConfig,
    rng: StdRng,
    reconciler: Reconciler,
    /// What the store should hold for the active partition
    model: HashMap<EntityKey, f64>,
    active: PartitionKey,
    epoch: StoreEpoch,
    retired: Vec<StoreEpoch>,
}

impl StateFuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let store = Arc::new(EntityStore::new());
        let active = Self::partition_name(0);
        let epoch = store.clear_for(active.clone());
        let reconciler = Reconciler::new(store, Arc::new(HighlightScheduler::default()));

        StateFuzzer {
            config,
            rng,
            reconciler,
            model: HashMap::new(),
            active,
            epoch,
            retired: Vec::new(),
        }
    }

    fn partition_name(index: usize) -> PartitionKey {
        PartitionKey::new(format!("partition-{}", index))
    }

    fn switch_partition(&mut self) {
        let index = self.rng.gen_range(0..self.config.partition_count.max(1));
        self.active = Self::partition_name(index);
        self.retired.push(self.epoch);
        self.epoch = self.reconciler.store().clear_for(self.active.clone());
        self.model.clear();
    }

    fn generate(&mut self) -> (StoreEpoch, PartitionKey, WireRecord, bool) {
        let key = format!("P{}", self.rng.gen_range(0..self.config.entity_count.max(1)));
        let partition =
            Self::partition_name(self.rng.gen_range(0..self.config.partition_count.max(1)));
        let count = self.rng.gen_range(0..100) as f64;
        let malformed = self.rng.gen::<f64>() < self.config.malformed_prob;

        let stale = !self.retired.is_empty()
            && self.rng.gen::<f64>() < self.config.stale_writer_prob;
        let writer = if stale {
            self.retired[self.rng.gen_range(0..self.retired.len())]
        } else {
            self.epoch
        };

        let record = WireRecord {
            key: Some(key),
            partition: Some(partition.as_str().to_string()),
            prior_mean: if malformed { None } else { Some(0.5) },
            posterior_mean: if count > 0.0 { Some(0.4 + count / 500.0) } else { None },
            effective_count: Some(count),
            visible: Some(count >= 5.0),
            ..WireRecord::default()
        };
        (writer, partition, record, malformed)
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> FuzzResult {
        let mut result = FuzzResult::default();

        for step in 0..self.config.record_count {
            if self.rng.gen::<f64>() < self.config.switch_prob {
                self.switch_partition();
                result.switches += 1;
            }

            let (writer, partition, record, malformed) = self.generate();
            let key = record.key.clone().map(EntityKey::new);
            let count = record.effective_count.unwrap_or_default();
            let outcome = self.reconciler.apply(writer, record);

            let expect_applied = !malformed && writer == self.epoch && partition == self.active;
            match (&outcome, expect_applied) {
                (RecordResult::Applied { .. }, true) => {
                    result.applied += 1;
                    if let Some(key) = key {
                        self.model.insert(key, count);
                    }
                }
                (RecordResult::Stale, false) if !malformed => result.stale += 1,
                (RecordResult::Malformed(_), false) if malformed => result.malformed += 1,
                _ => result
                    .violations
                    .push(format!("step {}: unexpected {:?}", step, outcome)),
            }
        }

        self.check_model(&mut result);
        result
    }

    fn check_model(&self, result: &mut FuzzResult) {
        let snapshot = self.reconciler.store().snapshot();
        if snapshot.len() != self.model.len() {
            result.violations.push(format!(
                "store holds {} entities, model {}",
                snapshot.len(),
                self.model.len()
            ));
        }
        for (key, record) in snapshot.iter() {
            if record.partition != self.active {
                result
                    .violations
                    .push(format!("{} belongs to {}", key, record.partition));
            }
            match self.model.get(key) {
                Some(count) if *count == record.effective_count => {}
                other => result.violations.push(format!(
                    "{} has count {}, model {:?}",
                    key, record.effective_count, other
                )),
            }
        }
    }
}

/// Fuzzing result
#[derive(Debug, Default)]
pub struct FuzzResult {
    pub applied: u64,
    pub stale: u64,
    pub malformed: u64,
    pub switches: u64,
    pub violations: Vec<String>,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fuzzer_light() {
        let result = StateFuzzer::new(FuzzerConfig::light()).run();
        assert!(result.is_valid(), "{:?}", result.violations);
        assert!(result.applied > 0);
    }

    #[test]
    fn test_fuzzer_default() {
        let result = StateFuzzer::new(FuzzerConfig::default()).run();
        assert!(result.is_valid(), "{:?}", result.violations);
        assert!(result.stale > 0);
        assert!(result.malformed > 0);
        assert!(result.switches > 0);
    }

    #[test]
    fn test_no_noise_applies_everything_for_one_partition() {
        let config = FuzzerConfig {
            entity_count: 4,
            partition_count: 1,
            record_count: 50,
            switch_prob: 0.0,
            malformed_prob: 0.0,
            stale_writer_prob: 0.0,
            seed: 7,
        };
        let result = StateFuzzer::new(config).run();
        assert!(result.is_valid());
        assert_eq!(result.applied, 50);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_any_seed_holds(seed in any::<u64>()) {
            let config = FuzzerConfig { seed, ..FuzzerConfig::light() };
            let result = StateFuzzer::new(config).run();
            prop_assert!(result.is_valid(), "{:?}", result.violations);
        }
    }
}
