//! Event log - append-only, length-bounded sequence of classified signals
//!
//! Oldest entries are evicted first once capacity is reached. The fixed
//! capacity is the only backpressure in the engine.

use std::collections::VecDeque;

use pulse_core::ClassifiedSignal;

/// Default number of signals retained
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// Event log
#[derive(Clone, Debug)]
pub struct EventLog {
    entries: VecDeque<ClassifiedSignal>,
    capacity: usize,
    /// Total evicted since creation
    evicted: u64,
}

impl EventLog {
    /// Create a log holding at most `capacity` signals (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        EventLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append to the tail; returns the evicted head, if any
    pub fn append(&mut self, signal: ClassifiedSignal) -> Option<ClassifiedSignal> {
        let evicted = if self.entries.len() >= self.capacity {
            self.evicted += 1;
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(signal);
        evicted
    }

    /// Every retained signal, oldest first
    pub fn all(&self) -> Vec<ClassifiedSignal> {
        self.entries.iter().cloned().collect()
    }

    /// The last `n` signals, oldest first
    pub fn recent(&self, n: usize) -> Vec<ClassifiedSignal> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassifiedSignal> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&ClassifiedSignal> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
