//! Reconciliation pipeline
//!
//! Every record from fetch or push goes through the same stages:
//! 1. Validate (malformed records are dropped, store untouched)
//! 2. Merge under the writer's epoch (stale partitions are dropped)
//! 3. Change verdict against the replaced record
//! 4. Open a highlight window on material change

use std::ops::AddAssign;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, trace};

use pulse_classify::ChangeClassifier;
use pulse_core::{
    EntityKey, EstimateRecord, PulseError, StoreEpoch, WireRecord, DEFAULT_K_ANONYMITY,
};

use crate::{EntityStore, HighlightScheduler, MergeOutcome};

/// Counts for a batch of records (or cumulative totals)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub received: u64,
    /// Merged into the store
    pub applied: u64,
    /// Applied and materially changed (highlight opened)
    pub changed: u64,
    /// Applied without material change
    pub unchanged: u64,
    /// Refused: wrong partition or superseded channel
    pub stale: u64,
    /// Refused: failed validation
    pub malformed: u64,
}

impl AddAssign for ReconcileStats {
    fn add_assign(&mut self, rhs: Self) {
        self.received += rhs.received;
        self.applied += rhs.applied;
        self.changed += rhs.changed;
        self.unchanged += rhs.unchanged;
        self.stale += rhs.stale;
        self.malformed += rhs.malformed;
    }
}

/// Result for one record
#[derive(Clone, Debug, PartialEq)]
pub enum RecordResult {
    Applied { changed: bool },
    Stale,
    Malformed(PulseError),
}

/// Reconciler - the only writer into the entity store
#[derive(Debug)]
pub struct Reconciler {
    store: Arc<EntityStore>,
    highlights: Arc<HighlightScheduler>,
    k_anonymity: f64,
    totals: Mutex<ReconcileStats>,
}

impl Reconciler {
    pub fn new(store: Arc<EntityStore>, highlights: Arc<HighlightScheduler>) -> Self {
        Reconciler {
            store,
            highlights,
            k_anonymity: DEFAULT_K_ANONYMITY,
            totals: Mutex::new(ReconcileStats::default()),
        }
    }

    pub fn with_k_anonymity(mut self, k_anonymity: f64) -> Self {
        self.k_anonymity = k_anonymity;
        self
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn highlights(&self) -> &Arc<HighlightScheduler> {
        &self.highlights
    }

    /// Process a batch (full fetch) in order
    pub fn apply_batch(&self, writer: StoreEpoch, records: Vec<WireRecord>) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        for wire in records {
            stats += self.process(writer, wire);
        }
        *self.totals.lock() += stats;
        stats
    }

    /// Process a single record (push event)
    pub fn apply(&self, writer: StoreEpoch, wire: WireRecord) -> RecordResult {
        let (stats, result) = self.process_single(writer, wire);
        *self.totals.lock() += stats;
        result
    }

    /// Cumulative totals since creation
    pub fn totals(&self) -> ReconcileStats {
        *self.totals.lock()
    }

    fn process(&self, writer: StoreEpoch, wire: WireRecord) -> ReconcileStats {
        self.process_single(writer, wire).0
    }

    fn process_single(
        &self,
        writer: StoreEpoch,
        wire: WireRecord,
    ) -> (ReconcileStats, RecordResult) {
        let mut stats = ReconcileStats {
            received: 1,
            ..ReconcileStats::default()
        };

        // Stage 1: Validate
        let record = match EstimateRecord::from_wire(wire, Utc::now(), self.k_anonymity) {
            Ok(record) => record,
            Err(err) => {
                debug!(error = %err, "dropping malformed record");
                stats.malformed = 1;
                return (stats, RecordResult::Malformed(err));
            }
        };
        let key = record.key.clone();
        let candidate = record.clone();

        // Stage 2: Merge
        match self.store.merge(writer, record) {
            MergeOutcome::Rejected(reason) => {
                debug!(entity = %key, reason = ?reason, "dropping stale record");
                stats.stale = 1;
                (stats, RecordResult::Stale)
            }
            outcome => {
                // Stage 3: Change verdict
                let changed = ChangeClassifier::changed(&candidate, outcome.previous());

                // Stage 4: Highlight
                if changed {
                    self.highlight_if_current(writer, &key);
                    stats.changed = 1;
                } else {
                    stats.unchanged = 1;
                }
                stats.applied = 1;
                trace!(entity = %key, changed, "record applied");
                (stats, RecordResult::Applied { changed })
            }
        }
    }

    /// Mark `key` unless the store was cleared since `writer` merged
    fn highlight_if_current(&self, writer: StoreEpoch, key: &EntityKey) -> bool {
        if self.store.epoch() != writer {
            trace!(entity = %key, "store moved on; skipping highlight");
            return false;
        }
        self.highlights.mark(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{EntityKey, PartitionKey};

    fn setup(partition: &str) -> Reconciler {
        let store = Arc::new(EntityStore::for_partition(PartitionKey::new(partition)));
        Reconciler::new(store, Arc::new(HighlightScheduler::default()))
    }

    fn wire(key: &str, partition: &str, count: f64, posterior: Option<f64>) -> WireRecord {
        WireRecord {
            key: Some(key.into()),
            partition: Some(partition.into()),
            prior_mean: Some(0.6),
            posterior_mean: posterior,
            effective_count: Some(count),
            visible: Some(count >= 5.0),
            ..WireRecord::default()
        }
    }

    #[test]
    fn test_first_sighting_is_change() {
        let reconciler = setup("A");
        let epoch = reconciler.store().epoch();
        let result = reconciler.apply(epoch, wire("P1", "A", 0.0, None));
        assert_eq!(result, RecordResult::Applied { changed: true });
        assert!(reconciler.highlights().is_highlighted(&EntityKey::new("P1")));
    }

    #[test]
    fn test_identical_record_is_not_change() {
        let reconciler = setup("A");
        let epoch = reconciler.store().epoch();
        reconciler.apply(epoch, wire("P1", "A", 0.0, None));
        reconciler.highlights().clear();

        let result = reconciler.apply(epoch, wire("P1", "A", 0.0, None));
        assert_eq!(result, RecordResult::Applied { changed: false });
        assert!(!reconciler.highlights().is_highlighted(&EntityKey::new("P1")));
    }

    #[test]
    fn test_malformed_leaves_store_unchanged() {
        let reconciler = setup("A");
        let epoch = reconciler.store().epoch();
        reconciler.apply(epoch, wire("P1", "A", 0.0, None));
        let before = reconciler.store().snapshot();

        let mut bad = wire("P1", "A", 9.0, Some(0.7));
        bad.prior_mean = None;
        assert!(matches!(reconciler.apply(epoch, bad), RecordResult::Malformed(_)));

        let after = reconciler.store().snapshot();
        assert_eq!(
            before.get(&EntityKey::new("P1")),
            after.get(&EntityKey::new("P1"))
        );
    }

    #[test]
    fn test_batch_stats() {
        let reconciler = setup("A");
        let epoch = reconciler.store().epoch();
        let stats = reconciler.apply_batch(
            epoch,
            vec![
                wire("P1", "A", 0.0, None),
                wire("P2", "A", 6.0, Some(0.7)),
                wire("P3", "B", 0.0, None),
                WireRecord::default(),
                wire("P1", "A", 0.0, None),
            ],
        );
        assert_eq!(
            stats,
            ReconcileStats {
                received: 5,
                applied: 3,
                changed: 2,
                unchanged: 1,
                stale: 1,
                malformed: 1,
            }
        );
        assert_eq!(reconciler.totals(), stats);
    }

    #[test]
    fn test_superseded_writer_is_stale() {
        let reconciler = setup("A");
        let old = reconciler.store().epoch();
        reconciler.store().clear_for(PartitionKey::new("A"));
        assert_eq!(reconciler.apply(old, wire("P1", "A", 0.0, None)), RecordResult::Stale);
        assert!(reconciler.store().is_empty());
    }

    #[test]
    fn test_no_highlight_once_store_cleared() {
        let reconciler = setup("A");
        let old = reconciler.store().epoch();
        let key = EntityKey::new("P1");
        assert!(reconciler.highlight_if_current(old, &key));
        reconciler.highlights().clear();

        // merge accepted under `old`, store cleared before the mark
        reconciler.store().clear_for(PartitionKey::new("B"));
        assert!(!reconciler.highlight_if_current(old, &key));
        assert!(!reconciler.highlights().is_highlighted(&key));
    }
}
