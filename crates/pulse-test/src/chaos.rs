//! Fault injection for the in-memory remote
//!
//! Simulates a misbehaving statistics service:
//! - Failing full-state fetches
//! - Refused push subscriptions
//! - Duplicated push delivery
//! - Reordered push delivery

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Remote chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Probability that a fetch fails (0.0 - 1.0)
    pub fetch_failure_rate: f64,
    /// Refuse every subscription attempt
    pub refuse_subscriptions: bool,
    /// Probability that a pushed record is delivered twice
    pub duplicate_prob: f64,
    /// Probability that a pushed record is held back behind the next one
    pub reorder_prob: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::calm()
    }
}

impl ChaosConfig {
    /// Well-behaved remote
    pub fn calm() -> Self {
        ChaosConfig {
            fetch_failure_rate: 0.0,
            refuse_subscriptions: false,
            duplicate_prob: 0.0,
            reorder_prob: 0.0,
        }
    }

    /// Occasional failures
    pub fn flaky() -> Self {
        ChaosConfig {
            fetch_failure_rate: 0.3,
            refuse_subscriptions: false,
            duplicate_prob: 0.1,
            reorder_prob: 0.1,
        }
    }

    /// Push channel unusable, fetches mostly failing
    pub fn hostile() -> Self {
        ChaosConfig {
            fetch_failure_rate: 0.7,
            refuse_subscriptions: true,
            duplicate_prob: 0.3,
            reorder_prob: 0.3,
        }
    }
}

/// What the chaos layer did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub fetches: u64,
    pub fetches_failed: u64,
    pub subscriptions: u64,
    pub subscriptions_refused: u64,
    pub pushes: u64,
    pub pushes_duplicated: u64,
    pub pushes_reordered: u64,
    pub submissions: u64,
    pub submissions_rejected: u64,
}

impl ChaosStats {
    pub fn fetch_failure_rate(&self) -> f64 {
        if self.fetches == 0 {
            0.0
        } else {
            self.fetches_failed as f64 / self.fetches as f64
        }
    }
}

/// Seeded decision source
#[derive(Debug)]
pub struct Chaos {
    config: ChaosConfig,
    rng: StdRng,
}

impl Chaos {
    pub fn new(config: ChaosConfig, seed: u64) -> Self {
        Chaos {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ChaosConfig) {
        self.config = config;
    }

    pub fn fail_fetch(&mut self) -> bool {
        self.roll(self.config.fetch_failure_rate)
    }

    pub fn refuse_subscription(&self) -> bool {
        self.config.refuse_subscriptions
    }

    pub fn duplicate(&mut self) -> bool {
        self.roll(self.config.duplicate_prob)
    }

    pub fn reorder(&mut self) -> bool {
        self.roll(self.config.reorder_prob)
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen::<f64>() < probability
    }
}
