//! Identity types for the precinct engine
//!
//! Entity and partition keys are opaque strings assigned by the remote
//! store. Signal ids are local, monotonically assigned per engine.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Entity key - identifies one precinct within a partition
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(Arc<str>);

impl EntityKey {
    #[inline]
    pub fn new(key: impl AsRef<str>) -> Self {
        EntityKey(Arc::from(key.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(key: &str) -> Self {
        EntityKey::new(key)
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        EntityKey(Arc::from(key))
    }
}

/// Partition key - a named scope (e.g. election type) under which
/// entity keys and their estimates are independent
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Arc<str>);

impl PartitionKey {
    #[inline]
    pub fn new(key: impl AsRef<str>) -> Self {
        PartitionKey(Arc::from(key.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Partition({})", self.0)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(key: &str) -> Self {
        PartitionKey::new(key)
    }
}

impl From<String> for PartitionKey {
    fn from(key: String) -> Self {
        PartitionKey(Arc::from(key))
    }
}

/// Classified signal identity - unique within one engine instance
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SignalId(pub u64);

impl SignalId {
    pub const ZERO: SignalId = SignalId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        SignalId(id)
    }
}

impl fmt::Debug for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signal({:016x})", self.0)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Store epoch - bumped every time the entity store is cleared for a
/// partition. Writers tagged with an older epoch are refused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StoreEpoch(pub u64);

impl StoreEpoch {
    pub const ZERO: StoreEpoch = StoreEpoch(0);

    #[inline]
    pub fn next(self) -> Self {
        StoreEpoch(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for StoreEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_equality_by_content() {
        let a = EntityKey::new("P1");
        let b = EntityKey::from(String::from("P1"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "P1");
        assert_eq!(format!("{:?}", a), "Entity(P1)");
    }

    #[test]
    fn test_partition_key_serde_transparent() {
        let key = PartitionKey::new("municipal");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"municipal\"");
        let back: PartitionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_entity_keys_as_json_map_keys() {
        let mut counts = std::collections::BTreeMap::new();
        counts.insert(EntityKey::new("P2"), 3);
        counts.insert(EntityKey::new("P1"), 1);
        let json = serde_json::to_string(&counts).unwrap();
        assert_eq!(json, r#"{"P1":1,"P2":3}"#);
        let back: std::collections::BTreeMap<EntityKey, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, counts);
    }

    #[test]
    fn test_store_epoch_advances() {
        let epoch = StoreEpoch::ZERO;
        assert!(epoch.next() > epoch);
        assert_eq!(epoch.next().next(), StoreEpoch(2));
    }
}
