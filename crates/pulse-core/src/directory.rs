//! Entity directory - immutable key to display-name lookup
//!
//! Built once at startup (typically from the precinct geometry file's
//! properties) and shared by `Arc` with every component that renders
//! names.

use std::collections::HashMap;

use crate::EntityKey;

#[derive(Clone, Debug, Default)]
pub struct EntityDirectory {
    names: HashMap<EntityKey, String>,
}

impl EntityDirectory {
    pub fn new() -> Self {
        EntityDirectory::default()
    }

    /// Build from (key, name) pairs. Later duplicates win.
    pub fn from_pairs<K, N>(pairs: impl IntoIterator<Item = (K, N)>) -> Self
    where
        K: Into<EntityKey>,
        N: Into<String>,
    {
        EntityDirectory {
            names: pairs.into_iter().map(|(k, n)| (k.into(), n.into())).collect(),
        }
    }

    /// Display name for a key, falling back to the key itself
    pub fn name_of<'a>(&'a self, key: &'a EntityKey) -> &'a str {
        self.names.get(key).map(String::as_str).unwrap_or_else(|| key.as_str())
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.names.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
