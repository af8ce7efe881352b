//! Remote interface - the authoritative store as seen from the engine
//!
//! The statistics service is opaque: it is reached through a full-state
//! fetch, a push subscription and an observation intake. Subscriptions are
//! explicit handles; the remote learns the subscriber is gone when the
//! handle is closed or dropped.

use async_trait::async_trait;
use tokio::sync::mpsc;

use pulse_core::{PartitionKey, PulseResult, RawObservation, WireRecord};

/// Default bound on undelivered push messages per subscription
pub const DEFAULT_PUSH_BUFFER: usize = 256;

/// One message on the push channel
#[derive(Clone, Debug, PartialEq)]
pub enum PushMessage {
    /// A changed record; may belong to any partition
    Record(WireRecord),
    /// Liveness of the push channel
    Status(bool),
}

/// Remote read, change-feed and intake API
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Full snapshot of a partition
    async fn fetch_all(&self, partition: &PartitionKey) -> PulseResult<Vec<WireRecord>>;

    /// Open a push subscription filtered to a partition
    async fn subscribe(&self, partition: &PartitionKey) -> PulseResult<Subscription>;

    /// Fire-and-forget observation intake. Success does not mean the
    /// estimates have been recomputed.
    async fn submit(&self, observation: &RawObservation) -> PulseResult<()>;
}

/// Subscriber half of a push subscription
#[derive(Debug)]
pub struct Subscription {
    events: mpsc::Receiver<PushMessage>,
}

/// Remote half of a push subscription. Clones share the stream; it ends
/// once every clone is dropped.
#[derive(Clone, Debug)]
pub struct SubscriptionFeed {
    events: mpsc::Sender<PushMessage>,
}

impl Subscription {
    /// Create a connected pair with a bounded buffer
    pub fn pair(buffer: usize) -> (SubscriptionFeed, Subscription) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (SubscriptionFeed { events: tx }, Subscription { events: rx })
    }

    /// Next push message; `None` once the remote ends the stream
    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.events.recv().await
    }

    /// Release the subscription. Dropping the handle has the same effect.
    pub fn close(mut self) {
        self.events.close();
    }
}

impl SubscriptionFeed {
    /// Deliver a record. Returns false once the subscriber is gone.
    pub async fn send_record(&self, record: WireRecord) -> bool {
        self.events.send(PushMessage::Record(record)).await.is_ok()
    }

    /// Deliver a status change. Returns false once the subscriber is gone.
    pub async fn send_status(&self, connected: bool) -> bool {
        self.events.send(PushMessage::Status(connected)).await.is_ok()
    }

    /// Whether the subscriber has closed or dropped its handle
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Resolves once the subscriber closes or drops its handle
    pub async fn closed(&self) {
        self.events.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (feed, mut sub) = Subscription::pair(4);
        assert!(feed.send_status(true).await);
        assert!(feed.send_record(WireRecord::default()).await);

        assert_eq!(sub.recv().await, Some(PushMessage::Status(true)));
        assert_eq!(sub.recv().await, Some(PushMessage::Record(WireRecord::default())));
    }

    #[tokio::test]
    async fn test_close_is_seen_by_feed() {
        let (feed, sub) = Subscription::pair(4);
        assert!(!feed.is_closed());
        sub.close();
        feed.closed().await;
        assert!(feed.is_closed());
        assert!(!feed.send_status(true).await);
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let (feed, sub) = Subscription::pair(4);
        drop(sub);
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn test_stream_end_when_feed_dropped() {
        let (feed, mut sub) = Subscription::pair(4);
        drop(feed);
        assert_eq!(sub.recv().await, None);
    }
}
