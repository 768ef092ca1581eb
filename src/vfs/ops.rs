//! VFS Operations: the user-facing file and directory API.
//!
//! Generalizes `fs/crdt_fs.rs`/`fs/event_fs.rs`'s `CrdtFs`/`EventFs` pair:
//! every mutating operation produces one or more CRDT
//! deltas (handed to an optional sink for fan-out to the Peer Protocol
//! Driver), persists through the [`DocumentStore`], and fires a
//! [`WatcherRegistry`] notification — in that order, so a watcher never
//! observes a change that failed to persist.
//!
//! `createFile`/`createDirectory` are two-phase: the tree slot is claimed
//! first (an atomic, validated CRDT map insert that fails with
//! `AlreadyExists` if the name is taken), and only once that succeeds is
//! the new file's content populated and persisted. This avoids ever
//! persisting an orphaned content document under a name that was never
//! actually claimed.

use std::sync::Arc;

use crate::document::tree::NodeKind;
use crate::document::store::DocumentStore;
use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::path_utils;
use crate::value::{FieldPath, Value};
use crate::vfs::resolver::PathResolver;
use crate::vfs::watch::{ChangeKind, SubscriptionId, WatcherRegistry};

/// A CRDT delta produced by a local mutation, tagged with which document it
/// belongs to so a sink can route it to the right peer-protocol channel.
#[derive(Debug, Clone)]
pub enum Delta {
    /// An update to the namespace tree document.
    Tree(Vec<u8>),
    /// An update to a file's content document.
    Content(DocumentId, Vec<u8>),
}

/// Receives every delta produced by a local mutation, in emission order.
pub type DeltaSink = dyn Fn(Delta) + Send + Sync;

/// The VFS: path resolution, file/directory operations, and change
/// notification, layered over a [`DocumentStore`].
pub struct Vfs {
    store: Arc<DocumentStore>,
    resolver: PathResolver,
    watchers: Arc<WatcherRegistry>,
    delta_sink: Option<Arc<DeltaSink>>,
}

impl Vfs {
    /// Build a VFS over `store`. `resolver_cache_capacity` sizes the path
    /// resolver's cache (see [`crate::config::EngineConfig`]).
    pub fn new(store: Arc<DocumentStore>, resolver_cache_capacity: usize) -> Self {
        Self {
            store,
            resolver: PathResolver::new(resolver_cache_capacity),
            watchers: Arc::new(WatcherRegistry::new()),
            delta_sink: None,
        }
    }

    /// Install the sink that receives every delta this VFS's mutations
    /// produce. Typically wired to the engine's peer protocol driver.
    pub fn set_delta_sink(&mut self, sink: Arc<DeltaSink>) {
        self.delta_sink = Some(sink);
    }

    fn emit(&self, delta: Delta) {
        if let Some(sink) = &self.delta_sink {
            sink(delta);
        }
    }

    /// Create a new file at `path` with initial content `content` (must be
    /// an object). Errors `AlreadyExists` if the path is occupied,
    /// `NotFound`/`NotADirectory` if the parent does not exist or is a file.
    pub fn create_file(&self, path: &str, content: Value) -> Result<()> {
        let segments = path_utils::normalize(path)?;
        let (parent, name) = path_utils::split_parent(&segments).ok_or_else(|| {
            Error::InvalidPath(path.to_string(), "cannot create the root".to_string())
        })?;

        let id = DocumentId::new();
        let tree_delta = {
            let tree_handle = self.store.tree();
            let mut tree = tree_handle.lock().unwrap();
            match tree.create_file(parent, name, id.clone()) {
                Ok(delta) => delta,
                Err(e) => {
                    self.store.forget_content(&id)?;
                    return Err(e);
                }
            }
        };

        let content_delta = {
            let handle = self.store.content(&id)?;
            let mut doc = handle.lock().unwrap();
            doc.replace_all(&content)?
        };

        self.store.save_content(&id)?;
        self.store.save_tree()?;

        self.emit(Delta::Content(id.clone(), content_delta));
        self.emit(Delta::Tree(tree_delta));
        self.watchers.notify(path, ChangeKind::Created);
        Ok(())
    }

    /// Create a new, empty directory at `path`.
    pub fn create_directory(&self, path: &str) -> Result<()> {
        let segments = path_utils::normalize(path)?;
        let (parent, name) = path_utils::split_parent(&segments).ok_or_else(|| {
            Error::InvalidPath(path.to_string(), "cannot create the root".to_string())
        })?;

        let tree_delta = {
            let tree_handle = self.store.tree();
            let mut tree = tree_handle.lock().unwrap();
            tree.create_directory(parent, name)?
        };
        self.store.save_tree()?;
        self.emit(Delta::Tree(tree_delta));
        self.watchers.notify(path, ChangeKind::Created);
        Ok(())
    }

    /// Read a file's whole content.
    pub fn read_file(&self, path: &str) -> Result<Value> {
        let id = self.resolve_file(path)?;
        let handle = self.store.content(&id)?;
        Ok(handle.lock().unwrap().read())
    }

    /// Replace a file's whole content.
    pub fn update_file(&self, path: &str, content: Value) -> Result<()> {
        let id = self.resolve_file(path)?;
        let delta = {
            let handle = self.store.content(&id)?;
            handle.lock().unwrap().replace_all(&content)?
        };
        self.store.save_content(&id)?;
        self.emit(Delta::Content(id, delta));
        self.watchers.notify(path, ChangeKind::Modified);
        Ok(())
    }

    /// Apply a structural patch at `field_path` within a file's content.
    /// Returns whether the addressed location already held a value.
    pub fn patch_file(&self, path: &str, field_path: &FieldPath, value: Value) -> Result<bool> {
        let id = self.resolve_file(path)?;
        let (existed, delta) = {
            let handle = self.store.content(&id)?;
            handle.lock().unwrap().patch(field_path, value)?
        };
        self.store.save_content(&id)?;
        self.emit(Delta::Content(id, delta));
        self.watchers.notify(path, ChangeKind::Modified);
        Ok(existed)
    }

    /// Splice a text leaf at `field_path` within a file's content. Returns
    /// whether the field already existed as text before the splice.
    pub fn splice_text(
        &self,
        path: &str,
        field_path: &FieldPath,
        start: usize,
        delete_count: usize,
        insert: &str,
    ) -> Result<bool> {
        let id = self.resolve_file(path)?;
        let (existed, delta) = {
            let handle = self.store.content(&id)?;
            handle
                .lock()
                .unwrap()
                .splice_text(field_path, start, delete_count, insert)?
        };
        self.store.save_content(&id)?;
        self.emit(Delta::Content(id, delta));
        self.watchers.notify(path, ChangeKind::Modified);
        Ok(existed)
    }

    /// Delete a file.
    pub fn delete_file(&self, path: &str) -> Result<()> {
        let segments = path_utils::normalize(path)?;
        let (parent, name) = path_utils::split_parent(&segments)
            .ok_or_else(|| Error::NotAFile("/".to_string()))?;

        let (doc_id, tree_delta) = {
            let tree_handle = self.store.tree();
            let mut tree = tree_handle.lock().unwrap();
            tree.remove_file(parent, name)?
        };
        self.store.forget_content(&doc_id)?;
        self.store.save_tree()?;
        self.emit(Delta::Tree(tree_delta));
        self.watchers.notify(path, ChangeKind::Deleted);
        Ok(())
    }

    /// Delete a directory. `recursive` must be set if it has children.
    pub fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        let segments = path_utils::normalize(path)?;
        let (parent, name) = path_utils::split_parent(&segments).ok_or_else(|| {
            Error::InvalidPath(path.to_string(), "cannot delete the root".to_string())
        })?;

        let (removed_ids, tree_delta) = {
            let tree_handle = self.store.tree();
            let mut tree = tree_handle.lock().unwrap();
            tree.remove_directory(parent, name, recursive)?
        };
        for id in removed_ids {
            self.store.forget_content(&id)?;
        }
        self.store.save_tree()?;
        self.emit(Delta::Tree(tree_delta));
        self.watchers.notify(path, ChangeKind::Deleted);
        Ok(())
    }

    /// Move/rename an entry. Errors `AlreadyExists` if the destination is
    /// occupied.
    pub fn rename(&self, src_path: &str, dst_path: &str) -> Result<()> {
        let src_segments = path_utils::normalize(src_path)?;
        let dst_segments = path_utils::normalize(dst_path)?;
        let (src_parent, src_name) = path_utils::split_parent(&src_segments).ok_or_else(|| {
            Error::InvalidPath(src_path.to_string(), "cannot rename the root".to_string())
        })?;
        let (dst_parent, dst_name) = path_utils::split_parent(&dst_segments).ok_or_else(|| {
            Error::InvalidPath(dst_path.to_string(), "cannot rename onto the root".to_string())
        })?;

        let tree_delta = {
            let tree_handle = self.store.tree();
            let mut tree = tree_handle.lock().unwrap();
            tree.rename(src_parent, src_name, dst_parent, dst_name)?
        };
        self.store.save_tree()?;
        self.emit(Delta::Tree(tree_delta));
        self.watchers.notify(src_path, ChangeKind::Deleted);
        self.watchers.notify(dst_path, ChangeKind::Moved);
        Ok(())
    }

    /// List a directory's immediate children.
    pub fn list_directory(&self, path: &str) -> Result<Vec<(String, NodeKind)>> {
        let segments = path_utils::normalize(path)?;
        let tree_handle = self.store.tree();
        let tree = tree_handle.lock().unwrap();
        let node = self.resolver.resolve(&tree, path, &segments)?;
        match node {
            Some(n) if n.kind != NodeKind::Directory => {
                Err(Error::NotADirectory(path.to_string()))
            }
            None if !segments.is_empty() => Err(Error::NotFound(path.to_string())),
            _ => Ok(tree
                .list_children(&segments)?
                .into_iter()
                .map(|(name, node)| (name, node.kind))
                .collect()),
        }
    }

    /// Whether any entry exists at `path`.
    pub fn exists(&self, path: &str) -> Result<bool> {
        let segments = path_utils::normalize(path)?;
        let tree_handle = self.store.tree();
        let tree = tree_handle.lock().unwrap();
        Ok(self.resolver.resolve(&tree, path, &segments)?.is_some())
    }

    /// Subscribe to changes at exactly `path`. Errors `NotFound` if `path`
    /// does not resolve at subscribe time.
    pub fn watch_file(
        &self,
        path: &str,
        listener: impl Fn(&crate::vfs::watch::ChangeEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.ensure_exists(path)?;
        Ok(self.watchers.subscribe_file(path, listener))
    }

    /// Subscribe to changes at `path` or anywhere beneath it. Errors
    /// `NotFound` if `path` does not resolve at subscribe time.
    pub fn watch_directory(
        &self,
        path: &str,
        listener: impl Fn(&crate::vfs::watch::ChangeEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.ensure_exists(path)?;
        Ok(self.watchers.subscribe_subtree(path, listener))
    }

    fn ensure_exists(&self, path: &str) -> Result<()> {
        let segments = path_utils::normalize(path)?;
        let tree_handle = self.store.tree();
        let tree = tree_handle.lock().unwrap();
        self.resolver
            .resolve(&tree, path, &segments)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(())
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.watchers.unsubscribe(id);
    }

    /// Handle to the underlying store, for the engine and peer protocol
    /// driver to read/persist documents this VFS does not itself expose
    /// (state vectors, diffs, root/peer identity).
    pub fn store(&self) -> Arc<DocumentStore> {
        Arc::clone(&self.store)
    }

    /// Apply a tree update received from a peer, then notify watchers.
    /// Tree updates can rename or restructure an arbitrary part of the
    /// namespace, so (unlike a local mutation, whose exact path is known
    /// up front) the notification is a coarse root-subtree `Modified` —
    /// subscribers narrow by their own scope.
    pub fn apply_remote_tree_delta(&self, bytes: &[u8]) -> Result<()> {
        self.store.apply_remote_tree_update(bytes)?;
        self.store.save_tree()?;
        self.watchers.notify("/", ChangeKind::Modified);
        Ok(())
    }

    /// Apply a content update received from a peer for `id`, then notify
    /// watchers at whatever path currently links to it (if any — a delta
    /// can arrive for a document this peer has not yet linked into its
    /// tree, in which case no notification fires).
    pub fn apply_remote_content_delta(&self, id: &DocumentId, bytes: &[u8]) -> Result<()> {
        self.store.apply_remote_content_update(id, bytes)?;
        self.store.save_content(id)?;
        let path = {
            let tree_handle = self.store.tree();
            let tree = tree_handle.lock().unwrap();
            tree.find_path(id)?
        };
        if let Some(segments) = path {
            self.watchers
                .notify(&path_utils::join(&segments), ChangeKind::Modified);
        }
        Ok(())
    }

    fn resolve_file(&self, path: &str) -> Result<DocumentId> {
        let segments = path_utils::normalize(path)?;
        let tree_handle = self.store.tree();
        let tree = tree_handle.lock().unwrap();
        let node = self
            .resolver
            .resolve(&tree, path, &segments)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        if node.kind != NodeKind::File {
            return Err(Error::NotAFile(path.to_string()));
        }
        Ok(node.doc_id.expect("file node always has a doc id"))
    }
}
