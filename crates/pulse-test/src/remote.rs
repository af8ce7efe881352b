//! In-memory remote
//!
//! A `RemoteSource` holding per-partition records. Tests write records,
//! publish them to live subscribers, flip push status and end streams.
//! Faults come from a seeded [`Chaos`] so runs are reproducible.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use pulse_core::{PartitionKey, PulseError, PulseResult, RawObservation, WireRecord};
use pulse_sync::{RemoteSource, Subscription, SubscriptionFeed, DEFAULT_PUSH_BUFFER};

use crate::{Chaos, ChaosConfig, ChaosStats};

#[derive(Debug)]
struct Subscriber {
    partition: PartitionKey,
    feed: SubscriptionFeed,
}

#[derive(Debug)]
struct RemoteState {
    records: HashMap<PartitionKey, BTreeMap<String, WireRecord>>,
    subscribers: Vec<Subscriber>,
    /// Records held back by reordering, delivered after the next publish
    held: Vec<(PartitionKey, WireRecord)>,
    submitted: Vec<RawObservation>,
    /// Time each fetch of a partition spends in flight
    fetch_delays: HashMap<PartitionKey, Duration>,
    offline: bool,
    reject_submissions: bool,
    chaos: Chaos,
    stats: ChaosStats,
}

/// Scriptable remote statistics service
#[derive(Debug)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_chaos(ChaosConfig::calm(), 0)
    }

    pub fn with_chaos(config: ChaosConfig, seed: u64) -> Self {
        InMemoryRemote {
            state: Mutex::new(RemoteState {
                records: HashMap::new(),
                subscribers: Vec::new(),
                held: Vec::new(),
                submitted: Vec::new(),
                fetch_delays: HashMap::new(),
                offline: false,
                reject_submissions: false,
                chaos: Chaos::new(config, seed),
                stats: ChaosStats::default(),
            }),
        }
    }

    // ========================================================================
    // Scripting
    // ========================================================================

    /// Store a record without notifying anyone. Records without a key or
    /// partition are ignored.
    pub fn upsert(&self, record: WireRecord) {
        let (Some(key), Some(partition)) = (record.key.clone(), record.partition.clone()) else {
            return;
        };
        self.state
            .lock()
            .records
            .entry(PartitionKey::new(partition))
            .or_default()
            .insert(key, record);
    }

    /// Store a record and push it to subscribers of its partition
    pub async fn publish(&self, record: WireRecord) {
        self.upsert(record.clone());
        let Some(partition) = record.partition.as_deref().map(PartitionKey::new) else {
            return;
        };
        let deliveries = {
            let mut state = self.state.lock();
            state.stats.pushes += 1;
            if state.chaos.reorder() {
                state.stats.pushes_reordered += 1;
                state.held.push((partition, record));
                return;
            }
            let mut batch = vec![(partition.clone(), record.clone())];
            if state.chaos.duplicate() {
                state.stats.pushes_duplicated += 1;
                batch.push((partition, record));
            }
            batch.append(&mut state.held);
            Self::route(&mut state, batch)
        };
        Self::deliver(deliveries).await;
    }

    /// Push a record to subscribers of `partition` regardless of the
    /// record's own partition, without storing it
    pub async fn push_to(&self, partition: &PartitionKey, record: WireRecord) {
        let deliveries = {
            let mut state = self.state.lock();
            Self::route(&mut state, vec![(partition.clone(), record)])
        };
        Self::deliver(deliveries).await;
    }

    /// Deliver everything held back by reordering
    pub async fn flush(&self) {
        let deliveries = {
            let mut state = self.state.lock();
            let held = std::mem::take(&mut state.held);
            Self::route(&mut state, held)
        };
        Self::deliver(deliveries).await;
    }

    /// Report push liveness to every subscriber
    pub async fn set_status(&self, connected: bool) {
        let feeds: Vec<SubscriptionFeed> = {
            let mut state = self.state.lock();
            state.subscribers.retain(|s| !s.feed.is_closed());
            state.subscribers.iter().map(|s| s.feed.clone()).collect()
        };
        for feed in feeds {
            feed.send_status(connected).await;
        }
    }

    /// End every push stream from the remote side
    pub fn end_streams(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Make every fetch fail until turned back on
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Hold every fetch of `partition` for `delay` before answering. The
    /// answer reflects the records at the end of the delay.
    pub fn set_fetch_delay(&self, partition: &PartitionKey, delay: Duration) {
        self.state.lock().fetch_delays.insert(partition.clone(), delay);
    }

    pub fn set_reject_submissions(&self, reject: bool) {
        self.state.lock().reject_submissions = reject;
    }

    pub fn set_chaos(&self, config: ChaosConfig) {
        self.state.lock().chaos.set_config(config);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Stored records of a partition, ordered by key
    pub fn records(&self, partition: &PartitionKey) -> Vec<WireRecord> {
        self.state
            .lock()
            .records
            .get(partition)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscriptions whose subscriber has not closed its handle
    pub fn live_subscribers(&self, partition: &PartitionKey) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|s| &s.partition == partition && !s.feed.is_closed())
            .count()
    }

    pub fn submitted(&self) -> Vec<RawObservation> {
        self.state.lock().submitted.clone()
    }

    pub fn stats(&self) -> ChaosStats {
        self.state.lock().stats
    }

    fn route(
        state: &mut RemoteState,
        batch: Vec<(PartitionKey, WireRecord)>,
    ) -> Vec<(SubscriptionFeed, WireRecord)> {
        state.subscribers.retain(|s| !s.feed.is_closed());
        let mut deliveries = Vec::new();
        for (partition, record) in batch {
            for subscriber in state.subscribers.iter().filter(|s| s.partition == partition) {
                deliveries.push((subscriber.feed.clone(), record.clone()));
            }
        }
        deliveries
    }

    async fn deliver(deliveries: Vec<(SubscriptionFeed, WireRecord)>) {
        for (feed, record) in deliveries {
            feed.send_record(record).await;
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSource for InMemoryRemote {
    async fn fetch_all(&self, partition: &PartitionKey) -> PulseResult<Vec<WireRecord>> {
        let delay = self.state.lock().fetch_delays.get(partition).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        state.stats.fetches += 1;
        if state.offline || state.chaos.fail_fetch() {
            state.stats.fetches_failed += 1;
            return Err(PulseError::FetchFailed {
                partition: partition.clone(),
                reason: "remote unavailable".into(),
            });
        }
        Ok(state
            .records
            .get(partition)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn subscribe(&self, partition: &PartitionKey) -> PulseResult<Subscription> {
        let mut state = self.state.lock();
        state.stats.subscriptions += 1;
        if state.chaos.refuse_subscription() {
            state.stats.subscriptions_refused += 1;
            return Err(PulseError::SubscribeFailed {
                partition: partition.clone(),
                reason: "subscriptions refused".into(),
            });
        }
        let (feed, subscription) = Subscription::pair(DEFAULT_PUSH_BUFFER);
        state.subscribers.push(Subscriber {
            partition: partition.clone(),
            feed,
        });
        Ok(subscription)
    }

    async fn submit(&self, observation: &RawObservation) -> PulseResult<()> {
        let mut state = self.state.lock();
        state.stats.submissions += 1;
        if state.reject_submissions {
            state.stats.submissions_rejected += 1;
            return Err(PulseError::SubmissionFailed("intake closed".into()));
        }
        state.submitted.push(observation.clone());
        Ok(())
    }
}
