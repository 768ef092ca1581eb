//! In-memory [`Storage`] implementation, for tests and as a default.
//!
//! Modeled on `crdt/memory_storage.rs`'s `MemoryStorage`: data is
//! thread-safe via a lock but lost when dropped.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Entry, Storage, StorageKey};
use crate::error::Result;

/// In-memory key/value storage, keyed by ordered [`StorageKey`] for
/// efficient prefix range queries.
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<StorageKey, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &StorageKey) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().unwrap();
        Ok(data.get(key).cloned())
    }

    fn save(&self, key: &StorageKey, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &StorageKey) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.remove(key);
        Ok(())
    }

    fn load_range(&self, prefix: &StorageKey) -> Result<Vec<Entry>> {
        let data = self.data.read().unwrap();
        Ok(data
            .iter()
            .filter(|(k, _)| prefix.is_prefix_of(k))
            .map(|(k, v)| Entry {
                key: k.clone(),
                bytes: v.clone(),
            })
            .collect())
    }

    fn remove_range(&self, prefix: &StorageKey) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.retain(|k, _| !prefix.is_prefix_of(k));
        Ok(())
    }
}
