//! Async-facing adapter over the synchronous [`Vfs`] core.
//!
//! Every VFS operation is exposed as `async fn`, the same way
//! [`AsyncFileSystem`] exposes the filesystem. Internally, a single
//! document's CRDT mutation is CPU-bound and already serialized by its own
//! mutex — there is nothing to suspend on. Rather than invent blocking
//! points, this type follows `fs::async_fs.rs`'s own answer to exactly this
//! shape mismatch: [`SyncToAsyncFs`] wraps a synchronous `FileSystem` so it
//! can be used from async callers without its operations actually yielding
//! mid-call. `AsyncVfs` is the same adapter applied to [`Vfs`].
//!
//! [`AsyncFileSystem`]: https://docs.rs/diaryx_core (`fs::AsyncFileSystem`)
//! [`SyncToAsyncFs`]: https://docs.rs/diaryx_core (`fs::SyncToAsyncFs`)

use std::sync::Arc;

use crate::document::tree::NodeKind;
use crate::error::Result;
use crate::value::{FieldPath, Value};
use crate::vfs::ops::Vfs;
use crate::vfs::watch::{ChangeEvent, SubscriptionId};

/// Async-facing handle to a workspace's VFS, returned by
/// [`crate::engine::Engine::vfs`].
#[derive(Clone)]
pub struct AsyncVfs {
    inner: Arc<Vfs>,
}

impl AsyncVfs {
    /// Wrap a synchronous [`Vfs`] for async callers.
    pub fn new(inner: Arc<Vfs>) -> Self {
        Self { inner }
    }

    /// The wrapped synchronous VFS, for callers (e.g. the peer protocol
    /// driver) that need direct, non-async access.
    pub fn inner(&self) -> &Arc<Vfs> {
        &self.inner
    }

    /// See [`Vfs::create_file`].
    pub async fn create_file(&self, path: &str, content: Value) -> Result<()> {
        self.inner.create_file(path, content)
    }

    /// See [`Vfs::create_directory`].
    pub async fn create_directory(&self, path: &str) -> Result<()> {
        self.inner.create_directory(path)
    }

    /// See [`Vfs::read_file`].
    pub async fn read_file(&self, path: &str) -> Result<Value> {
        self.inner.read_file(path)
    }

    /// See [`Vfs::update_file`].
    pub async fn update_file(&self, path: &str, content: Value) -> Result<()> {
        self.inner.update_file(path, content)
    }

    /// See [`Vfs::patch_file`].
    pub async fn patch_file(&self, path: &str, field_path: &FieldPath, value: Value) -> Result<bool> {
        self.inner.patch_file(path, field_path, value)
    }

    /// See [`Vfs::splice_text`].
    pub async fn splice_text(
        &self,
        path: &str,
        field_path: &FieldPath,
        start: usize,
        delete_count: usize,
        insert: &str,
    ) -> Result<bool> {
        self.inner.splice_text(path, field_path, start, delete_count, insert)
    }

    /// See [`Vfs::delete_file`].
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.inner.delete_file(path)
    }

    /// See [`Vfs::delete_directory`].
    pub async fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        self.inner.delete_directory(path, recursive)
    }

    /// See [`Vfs::rename`].
    pub async fn rename(&self, src_path: &str, dst_path: &str) -> Result<()> {
        self.inner.rename(src_path, dst_path)
    }

    /// See [`Vfs::list_directory`].
    pub async fn list_directory(&self, path: &str) -> Result<Vec<(String, NodeKind)>> {
        self.inner.list_directory(path)
    }

    /// See [`Vfs::exists`].
    pub async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path)
    }

    /// See [`Vfs::watch_file`]. Delivery is synchronous (from the thread
    /// committing the change), matching §5's "a local write observes its
    /// own notifications synchronously w.r.t. the await" ordering
    /// guarantee — there is no queue between commit and listener.
    pub fn watch_file(
        &self,
        path: &str,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.inner.watch_file(path, listener)
    }

    /// See [`Vfs::watch_directory`].
    pub fn watch_directory(
        &self,
        path: &str,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionId> {
        self.inner.watch_directory(path, listener)
    }

    /// See [`Vfs::unsubscribe`].
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id);
    }
}
