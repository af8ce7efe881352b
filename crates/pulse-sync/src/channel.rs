//! Sync channel - keeps the entity store live for one partition
//!
//! Protocol:
//! 1. Full fetch, merge everything, then open the push subscription
//! 2. Push records for another partition are dropped, the rest merged
//! 3. Connected is false until the push channel reports live
//! 4. While not connected, re-fetch on every poll tick (and retry the
//!    subscription if none is open); stop as soon as connected
//! 5. Close cancels the poll timer, abandons any in-flight fetch and
//!    releases the subscription before returning
//!
//! Fetch and subscribe failures never reach the caller; they only keep
//! the channel in polling mode.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use pulse_core::{PartitionKey, PulseError, PulseResult, StoreEpoch};
use pulse_state::{ReconcileStats, Reconciler};

use crate::{PushMessage, RemoteSource, Subscription};

/// Default fallback poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Sync channel configuration
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Poll interval while the push channel is down
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug)]
enum Control {
    Refresh(oneshot::Sender<PulseResult<ReconcileStats>>),
    Close,
}

/// Cloneable handle for requesting a full fetch from a running channel.
/// Holding one does not keep the channel open.
#[derive(Clone, Debug)]
pub struct RefreshHandle {
    control: mpsc::Sender<Control>,
}

impl RefreshHandle {
    /// Run a full fetch now, regardless of connectivity. Fails with
    /// `ChannelClosed` if the channel closes before the fetch completes.
    pub async fn refresh(&self) -> PulseResult<ReconcileStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(Control::Refresh(reply_tx))
            .await
            .map_err(|_| PulseError::ChannelClosed)?;
        reply_rx.await.map_err(|_| PulseError::ChannelClosed)?
    }
}

/// Handle to a running sync channel
#[derive(Debug)]
pub struct SyncChannel {
    partition: PartitionKey,
    epoch: StoreEpoch,
    connected: watch::Receiver<bool>,
    control: mpsc::Sender<Control>,
    close_grace: Duration,
    task: Option<JoinHandle<()>>,
}

impl SyncChannel {
    /// Spawn a channel for `partition`. `epoch` must be the store epoch
    /// returned when the store was cleared for this partition.
    pub fn open(
        remote: Arc<dyn RemoteSource>,
        reconciler: Arc<Reconciler>,
        partition: PartitionKey,
        epoch: StoreEpoch,
        config: SyncConfig,
    ) -> Self {
        let (connected_tx, connected_rx) = watch::channel(false);
        let (control_tx, control_rx) = mpsc::channel(8);
        let close_grace = config.poll_interval;

        let worker = ChannelWorker {
            remote,
            reconciler,
            partition: partition.clone(),
            epoch,
            config,
            connected: connected_tx,
            subscription: None,
            pending: Vec::new(),
        };
        let task = tokio::spawn(worker.run(control_rx));
        info!(partition = %partition, epoch = ?epoch, "sync channel opened");

        SyncChannel {
            partition,
            epoch,
            connected: connected_rx,
            control: control_tx,
            close_grace,
            task: Some(task),
        }
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    pub fn epoch(&self) -> StoreEpoch {
        self.epoch
    }

    /// Whether the push subscription is confirmed live
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch connectivity changes
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn refresher(&self) -> RefreshHandle {
        RefreshHandle {
            control: self.control.clone(),
        }
    }

    /// Run a full fetch now, regardless of connectivity
    pub async fn refresh_now(&self) -> PulseResult<ReconcileStats> {
        self.refresher().refresh().await
    }

    /// Stop polling, release the subscription and wait for the worker to
    /// exit. An in-flight remote call is abandoned; a worker that has not
    /// exited within one poll interval is aborted. Nothing merges from
    /// this channel after `close` returns.
    pub async fn close(mut self) {
        // Queue full: the grace timeout still bounds the wait
        let _ = self.control.try_send(Control::Close);
        if let Some(mut task) = self.task.take() {
            let joined = match tokio::time::timeout(self.close_grace, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(partition = %self.partition, "sync worker still busy; aborting");
                    task.abort();
                    task.await
                }
            };
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    warn!(partition = %self.partition, error = %e, "sync worker ended abnormally");
                }
            }
        }
        info!(partition = %self.partition, "sync channel closed");
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ChannelWorker {
    remote: Arc<dyn RemoteSource>,
    reconciler: Arc<Reconciler>,
    partition: PartitionKey,
    epoch: StoreEpoch,
    config: SyncConfig,
    connected: watch::Sender<bool>,
    subscription: Option<Subscription>,
    /// Refresh requests that arrived while a remote call was in flight
    pending: Vec<oneshot::Sender<PulseResult<ReconcileStats>>>,
}

/// Close was requested (or every handle dropped) during a remote call
struct Closed;

impl ChannelWorker {
    async fn run(mut self, mut control: mpsc::Receiver<Control>) {
        if self.serve(&mut control).await.is_err() {
            debug!(partition = %self.partition, "closed during a remote call");
        }

        // Teardown: release the subscription, report disconnected
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
        }
        self.set_connected(false);
    }

    async fn serve(&mut self, control: &mut mpsc::Receiver<Control>) -> Result<(), Closed> {
        // Stage 1: initial snapshot, then push
        if let Err(e) = self.fetch_or_close(control).await? {
            warn!(partition = %self.partition, error = %e, "initial fetch failed; will poll");
        }
        self.subscribe_or_close(control).await?;

        let period = self.config.poll_interval;
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Stage 2: answer refreshes queued behind a remote call
            for reply in std::mem::take(&mut self.pending) {
                let result = self.fetch_or_close(control).await?;
                let _ = reply.send(result);
            }

            let polling = !*self.connected.borrow();
            tokio::select! {
                biased;

                ctrl = control.recv() => match ctrl {
                    Some(Control::Refresh(reply)) => {
                        let result = self.fetch_or_close(control).await?;
                        let _ = reply.send(result);
                    }
                    Some(Control::Close) | None => return Ok(()),
                },

                msg = next_push(&mut self.subscription) => match msg {
                    Some(PushMessage::Record(wire)) => self.on_push_record(wire),
                    Some(PushMessage::Status(up)) => {
                        if !up {
                            poll.reset();
                        }
                        self.set_connected(up);
                    }
                    None => {
                        warn!(partition = %self.partition, "push stream ended; polling");
                        self.subscription = None;
                        poll.reset();
                        self.set_connected(false);
                    }
                },

                _ = poll.tick(), if polling => {
                    // Status may have flipped while this tick was pending
                    if *self.connected.borrow() {
                        continue;
                    }
                    if let Err(e) = self.fetch_or_close(control).await? {
                        warn!(partition = %self.partition, error = %e, "poll fetch failed");
                    }
                    if self.subscription.is_none() {
                        self.subscribe_or_close(control).await?;
                    }
                }
            }
        }
    }

    /// Full fetch and merge, abandoned as soon as close is requested
    async fn fetch_or_close(
        &mut self,
        control: &mut mpsc::Receiver<Control>,
    ) -> Result<PulseResult<ReconcileStats>, Closed> {
        let (remote, reconciler, partition, epoch) =
            (&self.remote, &self.reconciler, &self.partition, self.epoch);
        let fetch = async {
            let records = remote.fetch_all(partition).await?;
            Ok::<_, PulseError>(merge_fetched(reconciler, partition, epoch, records))
        };
        until_closed(control, &mut self.pending, fetch).await
    }

    async fn subscribe_or_close(
        &mut self,
        control: &mut mpsc::Receiver<Control>,
    ) -> Result<(), Closed> {
        let result = until_closed(
            control,
            &mut self.pending,
            self.remote.subscribe(&self.partition),
        )
        .await?;
        match result {
            Ok(subscription) => {
                debug!(partition = %self.partition, "push subscription opened");
                self.subscription = Some(subscription);
            }
            Err(e) => {
                warn!(partition = %self.partition, error = %e, "push subscription failed; polling");
            }
        }
        Ok(())
    }

    fn on_push_record(&self, wire: pulse_core::WireRecord) {
        if let Some(partition) = wire.partition.as_deref() {
            if partition != self.partition.as_str() {
                debug!(active = %self.partition, got = partition, "dropping stale partition event");
                return;
            }
        }
        self.reconciler.apply(self.epoch, wire);
    }

    fn set_connected(&self, up: bool) {
        let changed = self.connected.send_if_modified(|current| {
            if *current == up {
                false
            } else {
                *current = up;
                true
            }
        });
        if changed {
            info!(partition = %self.partition, connected = up, "connectivity changed");
        }
    }
}

fn merge_fetched(
    reconciler: &Reconciler,
    partition: &PartitionKey,
    epoch: StoreEpoch,
    records: Vec<pulse_core::WireRecord>,
) -> ReconcileStats {
    let stats = reconciler.apply_batch(epoch, records);
    debug!(
        partition = %partition,
        received = stats.received,
        changed = stats.changed,
        stale = stats.stale,
        malformed = stats.malformed,
        "full fetch merged"
    );
    stats
}

/// Drive `call` to completion unless the channel is told to close first.
/// Refresh requests that arrive meanwhile are queued in `pending`.
async fn until_closed<T>(
    control: &mut mpsc::Receiver<Control>,
    pending: &mut Vec<oneshot::Sender<PulseResult<ReconcileStats>>>,
    call: impl Future<Output = T>,
) -> Result<T, Closed> {
    tokio::pin!(call);
    loop {
        tokio::select! {
            biased;

            ctrl = control.recv() => match ctrl {
                Some(Control::Refresh(reply)) => pending.push(reply),
                Some(Control::Close) | None => return Err(Closed),
            },

            out = &mut call => return Ok(out),
        }
    }
}

async fn next_push(subscription: &mut Option<Subscription>) -> Option<PushMessage> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}
