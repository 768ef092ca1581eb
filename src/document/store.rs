//! Document Store: loads, caches, and persists the tree and content
//! documents behind a pluggable [`Storage`] backend.
//!
//! Mirrors `WorkspaceCrdt::load`/`save`, generalized to
//! manage a whole family of documents (the tree, plus one per file) instead
//! of a single workspace document. Storage keys shard by the first two hex
//! characters of a document's id, the same layout the bundle codec uses
//! for its own on-disk reference implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use yrs::StateVector;

use crate::document::content::ContentDoc;
use crate::document::tree::TreeDoc;
use crate::document::DocumentId;
use crate::error::Result;
use crate::storage::{Entry, Storage, StorageKey};

const TREE_DOC_KEY: &str = "__tree__";
const DOCS_PREFIX: &str = "docs";
const META_PREFIX: &str = "meta";
const ROOT_ID_META_KEY: &str = "rootId";
const PEER_ID_META_KEY: &str = "peerId";

fn content_key(id: &DocumentId) -> StorageKey {
    StorageKey::new([DOCS_PREFIX, id.shard(), id.as_str()])
}

fn tree_key() -> StorageKey {
    StorageKey::new([DOCS_PREFIX, "__", TREE_DOC_KEY])
}

fn docs_prefix() -> StorageKey {
    StorageKey::new([DOCS_PREFIX])
}

fn meta_prefix() -> StorageKey {
    StorageKey::new([META_PREFIX])
}

fn root_id_key() -> StorageKey {
    StorageKey::new([META_PREFIX, ROOT_ID_META_KEY])
}

fn peer_id_key() -> StorageKey {
    StorageKey::new([META_PREFIX, PEER_ID_META_KEY])
}

/// Owns the VFS namespace tree and the set of loaded file content documents,
/// persisting both through a [`Storage`] backend.
pub struct DocumentStore {
    storage: Arc<dyn Storage>,
    tree: Arc<Mutex<TreeDoc>>,
    content: RwLock<HashMap<DocumentId, Arc<Mutex<ContentDoc>>>>,
}

impl DocumentStore {
    /// Open a store backed by `storage`, loading the tree document if one
    /// already exists, or starting from an empty tree.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let tree = match storage.load(&tree_key())? {
            Some(bytes) => TreeDoc::from_update(&bytes)?,
            None => TreeDoc::new(),
        };
        Ok(Self {
            storage,
            tree: Arc::new(Mutex::new(tree)),
            content: RwLock::new(HashMap::new()),
        })
    }

    /// A store with no persistence, useful for tests and transient sessions.
    pub fn in_memory() -> Self {
        Self::open(Arc::new(crate::storage::MemoryStorage::new()))
            .expect("empty in-memory storage never fails to open")
    }

    /// Handle to the namespace tree. Callers lock it for the duration of a
    /// single VFS operation.
    pub fn tree(&self) -> Arc<Mutex<TreeDoc>> {
        Arc::clone(&self.tree)
    }

    /// Persist the tree document's full state.
    pub fn save_tree(&self) -> Result<()> {
        let bytes = {
            let tree = self.tree.lock().unwrap();
            tree.encode_state_as_update(&StateVector::default())
        };
        self.storage.save(&tree_key(), &bytes)
    }

    /// Fetch (loading from storage on first access) the content document for
    /// `id`. Returns a fresh, empty document if none is stored yet — callers
    /// creating a new file are expected to populate it before it is saved.
    pub fn content(&self, id: &DocumentId) -> Result<Arc<Mutex<ContentDoc>>> {
        if let Some(existing) = self.content.read().unwrap().get(id) {
            return Ok(Arc::clone(existing));
        }

        let doc = match self.storage.load(&content_key(id))? {
            Some(bytes) => ContentDoc::from_update(&bytes)?,
            None => ContentDoc::new(),
        };
        let handle = Arc::new(Mutex::new(doc));
        self.content
            .write()
            .unwrap()
            .insert(id.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Persist a content document's full state.
    pub fn save_content(&self, id: &DocumentId) -> Result<()> {
        let handle = self.content(id)?;
        let bytes = {
            let doc = handle.lock().unwrap();
            doc.encode_state_as_update(&StateVector::default())
        };
        self.storage.save(&content_key(id), &bytes)
    }

    /// Drop a content document's storage entry and in-memory cache entry
    /// (called once a file is deleted from the tree and its content is no
    /// longer reachable).
    pub fn forget_content(&self, id: &DocumentId) -> Result<()> {
        self.content.write().unwrap().remove(id);
        self.storage.remove(&content_key(id))
    }

    /// Apply an incremental tree update received from a peer.
    pub fn apply_remote_tree_update(&self, bytes: &[u8]) -> Result<()> {
        self.tree.lock().unwrap().apply_update(bytes)
    }

    /// Apply an incremental content update received from a peer.
    pub fn apply_remote_content_update(&self, id: &DocumentId, bytes: &[u8]) -> Result<()> {
        let handle = self.content(id)?;
        handle.lock().unwrap().apply_update(bytes)
    }

    /// Full-state snapshot of the tree, for bundling or peer catch-up.
    pub fn tree_snapshot(&self) -> Vec<u8> {
        self.tree
            .lock()
            .unwrap()
            .encode_state_as_update(&StateVector::default())
    }

    /// Full-state snapshot of a content document, for bundling or peer
    /// catch-up.
    pub fn content_snapshot(&self, id: &DocumentId) -> Result<Vec<u8>> {
        let handle = self.content(id)?;
        let doc = handle.lock().unwrap();
        Ok(doc.encode_state_as_update(&StateVector::default()))
    }

    /// Current state vector of the namespace tree, for a peer's `SyncStep1`.
    pub fn tree_state_vector(&self) -> StateVector {
        self.tree.lock().unwrap().state_vector()
    }

    /// Updates to the tree the peer (at `since`) is missing, for `SyncStep2`.
    pub fn tree_encode_diff(&self, since: &StateVector) -> Vec<u8> {
        self.tree.lock().unwrap().encode_state_as_update(since)
    }

    /// Current state vector of a content document, for a peer's `SyncStep1`.
    pub fn content_state_vector(&self, id: &DocumentId) -> Result<StateVector> {
        let handle = self.content(id)?;
        Ok(handle.lock().unwrap().state_vector())
    }

    /// Updates to a content document the peer (at `since`) is missing, for
    /// `SyncStep2`.
    pub fn content_encode_diff(&self, id: &DocumentId, since: &StateVector) -> Result<Vec<u8>> {
        let handle = self.content(id)?;
        Ok(handle.lock().unwrap().encode_state_as_update(since))
    }

    /// This workspace's stable root document id, minted once at creation and
    /// persisted under a well-known storage key (used by `fromStorage` to
    /// rediscover it, and by the bundle manifest's `rootId`).
    pub fn root_id(&self) -> Result<Option<DocumentId>> {
        Ok(self
            .storage
            .load(&root_id_key())?
            .map(|bytes| DocumentId::from_string(String::from_utf8_lossy(&bytes).into_owned())))
    }

    /// Persist the workspace's root document id. Called once, at
    /// workspace creation; the id is immutable thereafter.
    pub fn set_root_id(&self, id: &DocumentId) -> Result<()> {
        self.storage.save(&root_id_key(), id.as_str().as_bytes())
    }

    /// This process's stable peer identity, if one has been persisted.
    pub fn peer_id(&self) -> Result<Option<String>> {
        Ok(self
            .storage
            .load(&peer_id_key())?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Persist this process's peer identity.
    pub fn set_peer_id(&self, peer_id: &str) -> Result<()> {
        self.storage.save(&peer_id_key(), peer_id.as_bytes())
    }

    /// Every document (tree + all loaded content) and workspace metadata
    /// entry, keyed exactly as stored. Used by the bundle codec to capture
    /// a complete, storage-layer-faithful snapshot: rather than re-deriving
    /// document boundaries, it ships whatever the `Storage` backend actually
    /// holds.
    pub fn all_entries(&self) -> Result<Vec<Entry>> {
        let mut entries = self.storage.load_range(&docs_prefix())?;
        entries.extend(self.storage.load_range(&meta_prefix())?);
        Ok(entries)
    }

    /// Ensure every file document reachable from the tree root is persisted
    /// (loaded into memory if necessary), so [`Self::all_entries`] captures
    /// a complete workspace even if some files were never touched by this
    /// process. Used before bundling.
    pub fn save_all_reachable(&self) -> Result<()> {
        let ids = self.tree.lock().unwrap().all_file_ids()?;
        for id in ids {
            self.content(&id)?;
            self.save_content(&id)?;
        }
        self.save_tree()
    }

    /// Every content document id currently cached in memory. Used by the
    /// bundle codec to enumerate what to pack; a freshly opened store with
    /// unloaded files will miss any not yet touched, so callers that need an
    /// exhaustive set should walk the tree instead.
    pub fn loaded_content_ids(&self) -> Vec<DocumentId> {
        self.content.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn tree_persists_across_reopen() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store = DocumentStore::open(Arc::clone(&storage)).unwrap();
        store
            .tree()
            .lock()
            .unwrap()
            .create_directory(&[], "notes")
            .unwrap();
        store.save_tree().unwrap();

        let reopened = DocumentStore::open(storage).unwrap();
        let node = reopened
            .tree()
            .lock()
            .unwrap()
            .resolve(&["notes".to_string()])
            .unwrap();
        assert!(node.is_some());
    }

    #[test]
    fn content_loads_empty_for_unknown_id() {
        let store = DocumentStore::in_memory();
        let id = DocumentId::new();
        let handle = store.content(&id).unwrap();
        assert_eq!(
            handle.lock().unwrap().read(),
            crate::value::Value::Object(indexmap::IndexMap::new())
        );
    }

    #[test]
    fn forget_content_drops_cache_and_storage() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let store = DocumentStore::open(Arc::clone(&storage)).unwrap();
        let id = DocumentId::new();
        store.content(&id).unwrap();
        store.save_content(&id).unwrap();
        assert!(storage.load(&content_key(&id)).unwrap().is_some());

        store.forget_content(&id).unwrap();
        assert!(storage.load(&content_key(&id)).unwrap().is_none());
    }

    #[test]
    fn remote_update_applies_to_cached_content() {
        let store_a = DocumentStore::in_memory();
        let id = DocumentId::new();
        let handle_a = store_a.content(&id).unwrap();
        {
            let mut doc = handle_a.lock().unwrap();
            let mut obj = indexmap::IndexMap::new();
            obj.insert("title".to_string(), crate::value::Value::String("x".into()));
            doc.replace_all(&crate::value::Value::Object(obj)).unwrap();
        }
        let snapshot = store_a.content_snapshot(&id).unwrap();

        let store_b = DocumentStore::in_memory();
        store_b.apply_remote_content_update(&id, &snapshot).unwrap();
        let handle_b = store_b.content(&id).unwrap();
        assert_eq!(
            handle_b.lock().unwrap().get_field("title"),
            Some(crate::value::Value::String("x".into()))
        );
    }
}
