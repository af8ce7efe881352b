//! Entity store - the local reality the rendering layer reads
//!
//! The map is held behind an `Arc` and copied on write: a snapshot is a
//! cheap clone of the `Arc`, and a merge that races an outstanding
//! snapshot clones the map rather than mutating what a reader holds.
//! Readers never observe a torn state.
//!
//! The store is bound to one partition at a time. `clear_for` retargets
//! and empties in one step and bumps the epoch; writers tagged with an
//! older epoch, or carrying a record for another partition, are refused.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use pulse_core::{EntityKey, EstimateRecord, PartitionKey, StoreEpoch};

/// Immutable view of the store at one instant
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    partition: Option<PartitionKey>,
    epoch: StoreEpoch,
    records: Arc<HashMap<EntityKey, EstimateRecord>>,
}

impl Snapshot {
    pub fn partition(&self) -> Option<&PartitionKey> {
        self.partition.as_ref()
    }

    pub fn epoch(&self) -> StoreEpoch {
        self.epoch
    }

    pub fn get(&self, key: &EntityKey) -> Option<&EstimateRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, &EstimateRecord)> {
        self.records.iter()
    }

    /// Keys in sorted order, for stable rendering
    pub fn sorted_keys(&self) -> Vec<EntityKey> {
        let mut keys: Vec<_> = self.records.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Why a merge was refused
#[derive(Clone, Debug, PartialEq)]
pub enum MergeRejection {
    /// The writer belongs to a channel from before the last clear
    StaleEpoch { writer: StoreEpoch, current: StoreEpoch },
    /// The record belongs to a partition other than the active one
    StalePartition { active: PartitionKey, got: PartitionKey },
    /// The store is detached (no active partition)
    Detached,
}

/// Result of a merge
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// First record for this key
    Inserted,
    /// Replaced an earlier record, returned here
    Replaced(EstimateRecord),
    Rejected(MergeRejection),
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, MergeOutcome::Rejected(_))
    }

    /// The record this merge replaced, if any
    pub fn previous(&self) -> Option<&EstimateRecord> {
        match self {
            MergeOutcome::Replaced(prev) => Some(prev),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    partition: Option<PartitionKey>,
    epoch: StoreEpoch,
    records: Arc<HashMap<EntityKey, EstimateRecord>>,
}

/// Entity store
#[derive(Debug, Default)]
pub struct EntityStore {
    inner: RwLock<StoreInner>,
}

impl EntityStore {
    /// Create a detached store; nothing merges until `clear_for`
    pub fn new() -> Self {
        EntityStore::default()
    }

    /// Create a store bound to `partition`
    pub fn for_partition(partition: PartitionKey) -> Self {
        let store = EntityStore::new();
        store.clear_for(partition);
        store
    }

    /// Insert or replace by key. Last write by arrival wins; `updatedAt`
    /// is not consulted.
    pub fn merge(&self, writer: StoreEpoch, record: EstimateRecord) -> MergeOutcome {
        let mut inner = self.inner.write();
        if writer != inner.epoch {
            return MergeOutcome::Rejected(MergeRejection::StaleEpoch {
                writer,
                current: inner.epoch,
            });
        }
        match &inner.partition {
            None => return MergeOutcome::Rejected(MergeRejection::Detached),
            Some(active) if *active != record.partition => {
                return MergeOutcome::Rejected(MergeRejection::StalePartition {
                    active: active.clone(),
                    got: record.partition,
                });
            }
            Some(_) => {}
        }

        let key = record.key.clone();
        match Arc::make_mut(&mut inner.records).insert(key, record) {
            Some(prev) => MergeOutcome::Replaced(prev),
            None => MergeOutcome::Inserted,
        }
    }

    /// Copy-on-read view of the current contents
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        Snapshot {
            partition: inner.partition.clone(),
            epoch: inner.epoch,
            records: Arc::clone(&inner.records),
        }
    }

    pub fn get(&self, key: &EntityKey) -> Option<EstimateRecord> {
        self.inner.read().records.get(key).cloned()
    }

    /// Empty the map, keeping the partition and epoch
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.records = Arc::new(HashMap::new());
    }

    /// Retarget to `partition`, empty the map and bump the epoch, in one
    /// step. Returns the epoch new writers must carry.
    pub fn clear_for(&self, partition: PartitionKey) -> StoreEpoch {
        let mut inner = self.inner.write();
        inner.partition = Some(partition);
        inner.epoch = inner.epoch.next();
        inner.records = Arc::new(HashMap::new());
        inner.epoch
    }

    /// Drop the partition binding and refuse all writers. Used on teardown.
    pub fn detach(&self) {
        let mut inner = self.inner.write();
        inner.partition = None;
        inner.epoch = inner.epoch.next();
        inner.records = Arc::new(HashMap::new());
    }

    pub fn partition(&self) -> Option<PartitionKey> {
        self.inner.read().partition.clone()
    }

    pub fn epoch(&self) -> StoreEpoch {
        self.inner.read().epoch
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}
