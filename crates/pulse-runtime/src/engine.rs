//! Engine - the facade the rendering layer talks to
//!
//! Owns the entity store, the highlight scheduler, the event log and the
//! sync channel of the active partition. A partition switch runs in three
//! stages:
//! 1. Retarget and clear the store (bumps the epoch, fencing the old channel)
//! 2. Close the old channel and wait for its worker
//! 3. Open a channel for the new partition under the new epoch
//!
//! Switches are serialized; two concurrent switches cannot interleave.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use pulse_classify::{ChangeClassifier, DerivedAttributes, DisplayFlags, SignalClassifier};
use pulse_core::{
    ClassifiedSignal, EntityDirectory, EntityKey, PartitionKey, PulseError, PulseResult,
    RawObservation, SignalId,
};
use pulse_state::{
    EntityStore, EventLog, HighlightEntry, HighlightScheduler, ReconcileStats, Reconciler, Snapshot,
};
use pulse_sync::{RemoteSource, SyncChannel};

use crate::EngineConfig;

/// Engine statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Cumulative reconciliation counts across all partitions
    pub reconcile: ReconcileStats,
    pub partition_switches: u64,
    pub signals_logged: u64,
    pub signals_evicted: u64,
    pub submissions_accepted: u64,
    pub submissions_failed: u64,
}

/// Live reconciliation engine
pub struct Engine {
    config: EngineConfig,
    remote: Arc<dyn RemoteSource>,
    directory: Arc<EntityDirectory>,
    store: Arc<EntityStore>,
    highlights: Arc<HighlightScheduler>,
    reconciler: Arc<Reconciler>,
    change_classifier: ChangeClassifier,
    signal_classifier: SignalClassifier,
    log: Mutex<EventLog>,
    /// Active channel; the async lock serializes partition switches
    channel: AsyncMutex<Option<SyncChannel>>,
    connectivity: RwLock<Option<watch::Receiver<bool>>>,
    selection: RwLock<Option<EntityKey>>,
    next_signal: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<EngineStats>,
    shut_down: AtomicBool,
}

impl Engine {
    /// Validate the configuration and start syncing `partition`
    pub async fn start(
        config: EngineConfig,
        remote: Arc<dyn RemoteSource>,
        directory: Arc<EntityDirectory>,
        partition: PartitionKey,
    ) -> PulseResult<Self> {
        config.validate()?;

        let store = Arc::new(EntityStore::new());
        let highlights = Arc::new(HighlightScheduler::new(config.highlight_window));
        let reconciler = Arc::new(
            Reconciler::new(store.clone(), highlights.clone())
                .with_k_anonymity(config.display.k_anonymity),
        );
        let sweeper = spawn_sweeper(highlights.clone(), config.sweep_interval);

        let engine = Engine {
            change_classifier: ChangeClassifier::with_tuning(config.display.clone()),
            signal_classifier: SignalClassifier::with_tuning(config.signals.clone()),
            log: Mutex::new(EventLog::new(config.log_capacity)),
            config,
            remote,
            directory,
            store,
            highlights,
            reconciler,
            channel: AsyncMutex::new(None),
            connectivity: RwLock::new(None),
            selection: RwLock::new(None),
            next_signal: AtomicU64::new(1),
            sweeper: Mutex::new(Some(sweeper)),
            stats: Mutex::new(EngineStats::default()),
            shut_down: AtomicBool::new(false),
        };
        engine.set_partition(partition).await?;
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<EntityDirectory> {
        &self.directory
    }

    // ========================================================================
    // Partition and sync
    // ========================================================================

    /// Switch the active partition. The store is empty for the new
    /// partition before any of its records are merged, and nothing from
    /// the old partition merges afterwards.
    pub async fn set_partition(&self, partition: PartitionKey) -> PulseResult<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PulseError::ChannelClosed);
        }
        let mut slot = self.channel.lock().await;

        // Stage 1: Retarget and clear
        let epoch = self.store.clear_for(partition.clone());
        self.highlights.clear();

        // Stage 2: Tear down the old channel
        if let Some(old) = slot.take() {
            debug!(from = %old.partition(), to = %partition, "closing previous channel");
            old.close().await;
            // drop anything the old worker marked before it stopped
            self.highlights.clear();
        }

        // Stage 3: Open the new channel
        let channel = SyncChannel::open(
            self.remote.clone(),
            self.reconciler.clone(),
            partition.clone(),
            epoch,
            self.config.sync(),
        );
        *self.connectivity.write() = Some(channel.connectivity());
        *slot = Some(channel);

        self.stats.lock().partition_switches += 1;
        info!(partition = %partition, epoch = ?epoch, "active partition set");
        Ok(())
    }

    /// Active partition, if any
    pub fn partition(&self) -> Option<PartitionKey> {
        self.store.partition()
    }

    /// Full fetch now, regardless of connectivity. Does not hold up a
    /// concurrent partition switch; if the channel is replaced first the
    /// refresh fails with `ChannelClosed`.
    pub async fn refresh_now(&self) -> PulseResult<ReconcileStats> {
        let refresher = match self.channel.lock().await.as_ref() {
            Some(channel) => channel.refresher(),
            None => return Err(PulseError::ChannelClosed),
        };
        refresher.refresh().await
    }

    /// Whether the push channel is confirmed live
    pub fn connected(&self) -> bool {
        self.connectivity
            .read()
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Watch connectivity of the current channel. A partition switch
    /// replaces the channel; callers re-acquire after switching.
    pub fn connectivity(&self) -> Option<watch::Receiver<bool>> {
        self.connectivity.read().clone()
    }

    // ========================================================================
    // Derived state
    // ========================================================================

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Steady-state attributes: selection applied, highlight not applied
    pub fn derived(&self, key: &EntityKey) -> Option<DerivedAttributes> {
        let record = self.store.get(key)?;
        let flags = DisplayFlags {
            highlighted: false,
            selected: self.is_selected(key),
        };
        Some(self.change_classifier.derive(&record, flags))
    }

    /// Attributes as drawn right now, highlight overrides included
    pub fn render(&self, key: &EntityKey) -> Option<DerivedAttributes> {
        let record = self.store.get(key)?;
        let flags = DisplayFlags {
            highlighted: self.highlights.is_highlighted(key),
            selected: self.is_selected(key),
        };
        Some(self.change_classifier.derive(&record, flags))
    }

    pub fn is_highlighted(&self, key: &EntityKey) -> bool {
        self.highlights.is_highlighted(key)
    }

    pub fn active_highlights(&self) -> Vec<HighlightEntry> {
        self.highlights.active()
    }

    pub fn select(&self, key: EntityKey) {
        trace!(entity = %key, "selected");
        *self.selection.write() = Some(key);
    }

    pub fn clear_selection(&self) {
        *self.selection.write() = None;
    }

    pub fn selection(&self) -> Option<EntityKey> {
        self.selection.read().clone()
    }

    fn is_selected(&self, key: &EntityKey) -> bool {
        self.selection.read().as_ref() == Some(key)
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Every retained signal, oldest first
    pub fn log(&self) -> Vec<ClassifiedSignal> {
        self.log.lock().all()
    }

    pub fn recent_log(&self, n: usize) -> Vec<ClassifiedSignal> {
        self.log.lock().recent(n)
    }

    /// Send an observation to the remote. Only an accepted observation is
    /// classified, logged and highlighted.
    pub async fn submit(&self, observation: RawObservation) -> PulseResult<ClassifiedSignal> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PulseError::ChannelClosed);
        }
        match self.remote.submit(&observation).await {
            Ok(()) => {
                self.stats.lock().submissions_accepted += 1;
                self.ingest_observation(&observation)
            }
            Err(e) => {
                self.stats.lock().submissions_failed += 1;
                warn!(entity = %observation.entity_key, error = %e, "observation rejected");
                Err(match e {
                    PulseError::SubmissionFailed(_) => e,
                    other => PulseError::SubmissionFailed(other.to_string()),
                })
            }
        }
    }

    /// Classify an observation that arrived from elsewhere, log it and
    /// highlight its entity. Fails with `ChannelClosed` after shutdown.
    pub fn ingest_observation(
        &self,
        observation: &RawObservation,
    ) -> PulseResult<ClassifiedSignal> {
        if self.is_shut_down() {
            return Err(PulseError::ChannelClosed);
        }
        let signal = self.classify_and_log(observation);
        self.highlights.mark(&observation.entity_key);
        Ok(signal)
    }

    /// Classify past observations into the log, oldest first. Opens no
    /// highlight windows. Returns how many were logged; none after
    /// shutdown.
    pub fn load_history(&self, observations: impl IntoIterator<Item = RawObservation>) -> usize {
        if self.is_shut_down() {
            debug!("history ignored after shutdown");
            return 0;
        }
        let mut history: Vec<RawObservation> = observations.into_iter().collect();
        history.sort_by_key(|obs| obs.submitted_at);
        for observation in &history {
            self.classify_and_log(observation);
        }
        debug!(count = history.len(), "history loaded");
        history.len()
    }

    fn classify_and_log(&self, observation: &RawObservation) -> ClassifiedSignal {
        let id = SignalId::new(self.next_signal.fetch_add(1, Ordering::Relaxed));
        let current = self.store.get(&observation.entity_key);
        let signal =
            self.signal_classifier
                .classify(id, observation, current.as_ref(), &self.directory);

        let evicted = self.log.lock().append(signal.clone());
        let mut stats = self.stats.lock();
        stats.signals_logged += 1;
        if evicted.is_some() {
            stats.signals_evicted += 1;
        }
        trace!(signal = %signal.id, label = %signal.label, "signal logged");
        signal
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn stats(&self) -> EngineStats {
        let mut stats = *self.stats.lock();
        stats.reconcile = self.reconciler.totals();
        stats
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Close the channel (awaiting its worker), stop the sweeper and drop
    /// every highlight. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
        }
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.store.detach();
        self.highlights.clear();
        *self.connectivity.write() = None;
        info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("partition", &self.store.partition())
            .field("entities", &self.store.len())
            .field("connected", &self.connected())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn spawn_sweeper(highlights: Arc<HighlightScheduler>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let expired = highlights.sweep();
            if expired > 0 {
                trace!(expired, "highlights expired");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::{CertaintyLevel, ComparisonLevel, Direction, ShareLevel, WireRecord};
    use pulse_sync::{Subscription, SubscriptionFeed};

    /// Serves fixed records per partition and keeps every feed it hands out
    #[derive(Default)]
    struct StubRemote {
        records: Mutex<Vec<WireRecord>>,
        feeds: Mutex<Vec<(PartitionKey, SubscriptionFeed)>>,
        reject_submit: AtomicBool,
        submitted: Mutex<Vec<RawObservation>>,
    }

    impl StubRemote {
        fn feed_for(&self, partition: &str) -> Option<SubscriptionFeed> {
            let mut feeds = self.feeds.lock();
            let index = feeds.iter().rposition(|(p, _)| p.as_str() == partition)?;
            Some(feeds.remove(index).1)
        }
    }

    #[async_trait]
    impl RemoteSource for StubRemote {
        async fn fetch_all(&self, partition: &PartitionKey) -> PulseResult<Vec<WireRecord>> {
            Ok(self
                .records
                .lock()
                .iter()
                .filter(|r| r.partition.as_deref() == Some(partition.as_str()))
                .cloned()
                .collect())
        }

        async fn subscribe(&self, partition: &PartitionKey) -> PulseResult<Subscription> {
            let (feed, subscription) = Subscription::pair(16);
            self.feeds.lock().push((partition.clone(), feed));
            Ok(subscription)
        }

        async fn submit(&self, observation: &RawObservation) -> PulseResult<()> {
            if self.reject_submit.load(Ordering::SeqCst) {
                return Err(PulseError::Transport("intake offline".into()));
            }
            self.submitted.lock().push(observation.clone());
            Ok(())
        }
    }

    /// Never answers a fetch
    #[derive(Default)]
    struct SlowRemote {
        fetches: AtomicU64,
    }

    #[async_trait]
    impl RemoteSource for SlowRemote {
        async fn fetch_all(&self, _partition: &PartitionKey) -> PulseResult<Vec<WireRecord>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }

        async fn subscribe(&self, _partition: &PartitionKey) -> PulseResult<Subscription> {
            Err(PulseError::Transport("no push".into()))
        }

        async fn submit(&self, _observation: &RawObservation) -> PulseResult<()> {
            Ok(())
        }
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

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn engine_with(records: Vec<WireRecord>) -> (Engine, Arc<StubRemote>) {
        let remote = Arc::new(StubRemote::default());
        *remote.records.lock() = records;
        let directory = Arc::new(EntityDirectory::from_pairs([("P1", "Precinct 1")]));
        let engine = Engine::start(
            EngineConfig::default(),
            remote.clone(),
            directory,
            PartitionKey::new("A"),
        )
        .await
        .unwrap();
        settle().await;
        (engine, remote)
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_update_highlights_then_expires() {
        let (engine, remote) = engine_with(vec![wire("P1", "A", 0.0, None)]).await;
        let p1 = EntityKey::new("P1");
        assert_eq!(engine.derived(&p1).unwrap().opacity, 0.55);

        // the fetch itself highlighted the first sighting; let it lapse
        tokio::time::advance(Duration::from_millis(2100)).await;
        settle().await;
        assert!(!engine.is_highlighted(&p1));

        // live push stops the poll from re-serving the stale record
        let feed = remote.feed_for("A").unwrap();
        assert!(feed.send_status(true).await);
        assert!(feed.send_record(wire("P1", "A", 6.0, Some(0.7))).await);
        settle().await;
        assert!(engine.connected());

        let opacity = engine.derived(&p1).unwrap().opacity;
        assert!(opacity > 0.55 && opacity <= 0.9);
        assert!(engine.is_highlighted(&p1));
        assert_eq!(engine.render(&p1).unwrap().opacity, 0.95);

        tokio::time::advance(Duration::from_millis(2001)).await;
        settle().await;
        assert!(!engine.is_highlighted(&p1));
        assert!(engine.active_highlights().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partition_switch_clears_store() {
        let (engine, remote) =
            engine_with(vec![wire("P1", "A", 0.0, None), wire("P9", "B", 0.0, None)]).await;
        assert!(engine.snapshot().contains(&EntityKey::new("P1")));

        engine.set_partition(PartitionKey::new("B")).await.unwrap();
        let snapshot = engine.snapshot();
        assert!(!snapshot.contains(&EntityKey::new("P1")));
        assert_eq!(snapshot.partition(), Some(&PartitionKey::new("B")));

        settle().await;
        assert!(engine.snapshot().contains(&EntityKey::new("P9")));
        // old subscription was released during the switch
        assert!(remote.feed_for("A").map(|f| f.is_closed()).unwrap_or(true));
        assert_eq!(engine.stats().partition_switches, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_maximises_emphasis() {
        let (engine, _remote) = engine_with(vec![wire("P1", "A", 0.0, None)]).await;
        let p1 = EntityKey::new("P1");
        let before = engine.derived(&p1).unwrap().emphasis;

        engine.select(p1.clone());
        assert_eq!(engine.derived(&p1).unwrap().emphasis, engine.config().display.emphasis_max);
        assert!(engine.derived(&p1).unwrap().emphasis > before);

        engine.clear_selection();
        assert_eq!(engine.derived(&p1).unwrap().emphasis, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_logs_and_highlights() {
        let (engine, remote) = engine_with(vec![]).await;
        let obs = RawObservation::new(
            "P1",
            ShareLevel::AlmostAll,
            ComparisonLevel::MuchHigher,
            CertaintyLevel::Sure,
        );

        let signal = engine.submit(obs).await.unwrap();
        assert_eq!(signal.direction, Direction::Higher);
        assert!(signal.label.starts_with("Precinct 1"));
        assert_eq!(engine.log().len(), 1);
        assert!(engine.is_highlighted(&EntityKey::new("P1")));
        assert_eq!(remote.submitted.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submit_appends_nothing() {
        let (engine, remote) = engine_with(vec![]).await;
        remote.reject_submit.store(true, Ordering::SeqCst);
        let obs = RawObservation::new(
            "P1",
            ShareLevel::Few,
            ComparisonLevel::Lower,
            CertaintyLevel::Neutral,
        );

        let err = engine.submit(obs).await.unwrap_err();
        assert!(matches!(err, PulseError::SubmissionFailed(_)));
        assert!(engine.log().is_empty());
        assert!(!engine.is_highlighted(&EntityKey::new("P1")));
        assert_eq!(engine.stats().submissions_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_ordered_without_highlights() {
        let (engine, _remote) = engine_with(vec![]).await;
        let t0 = chrono::Utc::now();
        let late = RawObservation::new(
            "P2",
            ShareLevel::Most,
            ComparisonLevel::Higher,
            CertaintyLevel::Sure,
        )
        .at(t0);
        let early = RawObservation::new(
            "P1",
            ShareLevel::Few,
            ComparisonLevel::Lower,
            CertaintyLevel::Sure,
        )
        .at(t0 - chrono::Duration::minutes(5));

        assert_eq!(engine.load_history(vec![late, early]), 2);
        let keys: Vec<_> = engine.log().iter().map(|s| s.entity_key.clone()).collect();
        assert_eq!(keys, vec![EntityKey::new("P1"), EntityKey::new("P2")]);
        assert!(engine.active_highlights().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_everything() {
        let (engine, remote) = engine_with(vec![wire("P1", "A", 0.0, None)]).await;
        let feed = remote.feed_for("A").unwrap();

        engine.shutdown().await;
        assert!(engine.is_shut_down());
        assert!(feed.is_closed());
        assert!(engine.active_highlights().is_empty());
        assert!(!engine.connected());
        assert!(matches!(
            engine.refresh_now().await,
            Err(PulseError::ChannelClosed)
        ));
        assert!(engine.set_partition(PartitionKey::new("B")).await.is_err());

        // a late push after shutdown changes nothing
        let _ = feed.send_record(wire("P2", "A", 9.0, Some(0.7))).await;
        settle().await;
        assert!(engine.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_observations_ignored_after_shutdown() {
        let (engine, _remote) = engine_with(vec![]).await;
        engine.shutdown().await;

        let obs = RawObservation::new(
            "P1",
            ShareLevel::Most,
            ComparisonLevel::Higher,
            CertaintyLevel::Sure,
        );
        assert!(matches!(
            engine.ingest_observation(&obs),
            Err(PulseError::ChannelClosed)
        ));
        assert_eq!(engine.load_history(vec![obs.clone()]), 0);
        assert!(matches!(engine.submit(obs).await, Err(PulseError::ChannelClosed)));

        assert!(engine.log().is_empty());
        assert!(engine.active_highlights().is_empty());
        assert_eq!(engine.stats().signals_logged, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_and_shutdown_do_not_wait_on_slow_fetch() {
        let remote = Arc::new(SlowRemote::default());
        let engine = Engine::start(
            EngineConfig::default(),
            remote.clone(),
            Arc::new(EntityDirectory::new()),
            PartitionKey::new("A"),
        )
        .await
        .unwrap();
        settle().await;
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);

        // a refresh parked behind the hung fetch must not block the switch
        let engine = Arc::new(engine);
        let background = engine.clone();
        let refresh = tokio::spawn(async move { background.refresh_now().await });
        settle().await;

        let bound = Duration::from_millis(2500);
        let switched =
            tokio::time::timeout(bound, engine.set_partition(PartitionKey::new("B"))).await;
        assert!(matches!(switched, Ok(Ok(()))));
        assert!(matches!(refresh.await.unwrap(), Err(PulseError::ChannelClosed)));

        let stopped = tokio::time::timeout(bound, engine.shutdown()).await;
        assert!(stopped.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_invalid_config() {
        let config = EngineConfig {
            log_capacity: 0,
            ..EngineConfig::default()
        };
        let result = Engine::start(
            config,
            Arc::new(StubRemote::default()),
            Arc::new(EntityDirectory::new()),
            PartitionKey::new("A"),
        )
        .await;
        assert!(matches!(result, Err(PulseError::InvalidConfig(_))));
    }
}
