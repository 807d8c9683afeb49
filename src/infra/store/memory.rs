//! In-memory key-value store preserving insertion order.

use std::collections::{BTreeMap, HashMap};

use crate::core::{KvStore, QrmError};

/// Insertion-ordered in-memory store for development, tests and as the
/// index behind the file-backed store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    /// key -> (insertion sequence, value)
    values: HashMap<String, (u64, String)>,
    /// insertion sequence -> key
    order: BTreeMap<u64, String>,
    scalars: HashMap<String, String>,
    next_seq: u64,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys (scalars excluded).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All scalars, for snapshotting.
    pub(crate) const fn scalars(&self) -> &HashMap<String, String> {
        &self.scalars
    }

    /// All keys and values in insertion order, for snapshotting.
    pub(crate) fn ordered(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order.values().filter_map(|key| {
            self.values
                .get(key)
                .map(|(_, value)| (key.as_str(), value.as_str()))
        })
    }

    fn insert(&mut self, key: &str, value: String) {
        if let Some(slot) = self.values.get_mut(key) {
            slot.1 = value;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.to_string());
        self.values.insert(key.to_string(), (seq, value));
    }

    fn remove(&mut self, key: &str) {
        if let Some((seq, _)) = self.values.remove(key) {
            self.order.remove(&seq);
        }
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, QrmError> {
        Ok(self.values.get(key).map(|(_, value)| value.clone()))
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), QrmError> {
        self.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), QrmError> {
        self.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, QrmError> {
        Ok(self
            .ordered()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect())
    }

    fn get_scalar(&self, key: &str) -> Result<Option<String>, QrmError> {
        Ok(self.scalars.get(key).cloned())
    }

    fn set_scalar(&mut self, key: &str, value: String) -> Result<(), QrmError> {
        self.scalars.insert(key.to_string(), value);
        Ok(())
    }
}
