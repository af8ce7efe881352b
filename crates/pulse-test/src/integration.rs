//! End-to-end Integration Test Suite
//!
//! Drives a full engine against the in-memory remote on a paused clock:
//! - Push updates and highlight windows
//! - Partition switching
//! - Polling fallback and subscription recovery
//! - Signal intake and the bounded log
//! - Teardown

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{EntityDirectory, PartitionKey, PulseResult, WireRecord};
use pulse_runtime::{Engine, EngineConfig};

use crate::InMemoryRemote;

// ============================================================================
// HARNESS
// ============================================================================

/// An engine wired to an in-memory remote
pub struct Harness {
    pub remote: Arc<InMemoryRemote>,
    pub engine: Engine,
}

impl Harness {
    /// Start an engine on `partition` with default configuration
    pub async fn start(remote: InMemoryRemote, partition: &str) -> PulseResult<Self> {
        Self::start_with(remote, partition, EngineConfig::default()).await
    }

    pub async fn start_with(
        remote: InMemoryRemote,
        partition: &str,
        config: EngineConfig,
    ) -> PulseResult<Self> {
        let remote = Arc::new(remote);
        let directory = Arc::new(EntityDirectory::from_pairs([
            ("P1", "Precinct 1"),
            ("P2", "Precinct 2"),
            ("Q1", "Ward Q1"),
        ]));
        let engine =
            Engine::start(config, remote.clone(), directory, PartitionKey::new(partition)).await?;
        let harness = Harness { remote, engine };
        harness.settle().await;
        Ok(harness)
    }

    /// Let spawned workers drain their queues without moving the clock
    pub async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Move the paused clock forward, then settle
    pub async fn advance(&self, by: Duration) {
        tokio::time::advance(by).await;
        self.settle().await;
    }
}

/// Record builder for scenarios
pub fn record(key: &str, partition: &str, count: f64, posterior: Option<f64>) -> WireRecord {
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
