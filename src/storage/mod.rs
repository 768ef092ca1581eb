//! Storage capability: chunk-addressed key/value persistence.
//!
//! `Storage` is consumed, not implemented, by this crate's core — persistence
//! backends (on-disk, IndexedDB, S3, ...) are external collaborators. The
//! trait is deliberately synchronous, matching `CrdtStorage`
//! (`crdt/storage.rs`): CRDT merges are CPU-bound and not suspended
//! mid-merge, and an in-memory or mmap-backed implementation never blocks
//! long enough to need `async fn` here. A disk- or network-backed
//! implementation is expected to manage its own blocking internally (e.g.
//! via a background writer thread) rather than push `async` onto this trait.

mod memory;

pub use memory::MemoryStorage;

use crate::error::Result;

/// A non-empty, ordered sequence of opaque key segments.
///
/// Segments are compared lexicographically component-by-component, so a
/// `StorageKey` naturally supports prefix range queries: `["docs", "ab"]` is
/// a prefix of `["docs", "ab", "0123"]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(Vec<String>);

impl StorageKey {
    /// Build a key from segments. Panics if `segments` is empty — every call
    /// site in this crate constructs keys from a fixed, non-empty shape.
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        assert!(!segments.is_empty(), "StorageKey must have at least one segment");
        Self(segments)
    }

    /// The key's segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `self` is a prefix of (or equal to) `other`.
    pub fn is_prefix_of(&self, other: &StorageKey) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

/// A key/value pair returned by [`Storage::load_range`].
#[derive(Debug, Clone)]
pub struct Entry {
    /// The entry's key.
    pub key: StorageKey,
    /// The entry's value.
    pub bytes: Vec<u8>,
}

/// Chunk-addressed key/value persistence, consumed by the Document Store.
///
/// Implementations MUST provide durable writes; the engine never issues an
/// explicit fsync or equivalent — a `save` that returns `Ok` is assumed
/// committed.
pub trait Storage: Send + Sync {
    /// Atomic read. Returns `None` if the key is absent.
    fn load(&self, key: &StorageKey) -> Result<Option<Vec<u8>>>;

    /// Atomic write; overwrites any existing value at `key`.
    fn save(&self, key: &StorageKey, bytes: &[u8]) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove(&self, key: &StorageKey) -> Result<()>;

    /// Load every entry whose key has `prefix` as a prefix.
    fn load_range(&self, prefix: &StorageKey) -> Result<Vec<Entry>>;

    /// Remove every entry whose key has `prefix` as a prefix.
    fn remove_range(&self, prefix: &StorageKey) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching() {
        let prefix = StorageKey::new(["docs", "ab"]);
        let key = StorageKey::new(["docs", "ab", "0123"]);
        let other = StorageKey::new(["docs", "cd", "0123"]);
        assert!(prefix.is_prefix_of(&key));
        assert!(!prefix.is_prefix_of(&other));
        assert!(prefix.is_prefix_of(&prefix));
    }
}
