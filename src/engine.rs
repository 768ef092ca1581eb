//! Sync Engine: the single façade a caller constructs to get a whole
//! workspace — document storage, VFS, and live peer connections — behind
//! one handle.
//!
//! Grounded on `diaryx.rs`'s top-level `Diaryx<FS>` façade, which composes
//! workspace/fs/sync state behind one type with a handful of accessor
//! methods, and on `RustSyncManager`'s "owns everything, exposes one
//! surface" shape. Connected peers are held in an arena keyed by
//! [`PeerId`] rather than as direct references, so the engine never forms a
//! reference cycle with the sessions it spawns — each session only sees a
//! cancellation flag and a stream of locally produced deltas.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::bundle::{self, Manifest, ManifestFields};
use crate::config::EngineConfig;
use crate::document::store::DocumentStore;
use crate::document::DocumentId;
use crate::error::{Error, Result};
use crate::peer::session;
use crate::peer::PeerId;
use crate::storage::{MemoryStorage, Storage};
use crate::transport::Transport;
use crate::vfs::{AsyncVfs, Delta, Vfs};

/// Options accepted by [`Engine::create`]. All fields are optional; a bare
/// `CreateOptions::default()` mints a fresh in-memory workspace.
#[derive(Default)]
pub struct CreateOptions {
    /// This process's peer identity. A random one is minted if omitted.
    pub peer_id: Option<String>,
    /// Backing persistence. Defaults to an in-memory [`MemoryStorage`],
    /// discarded once the engine is dropped.
    pub storage: Option<Arc<dyn Storage>>,
    /// Tunables for the resolver cache, reconnect backoff, and idle
    /// timeouts. Defaults to [`EngineConfig::default`].
    pub config: Option<EngineConfig>,
}

/// Options accepted by [`Engine::from_bundle`].
#[derive(Default)]
pub struct FromBundleOptions {
    /// Backing persistence to load the bundle's entries into. Defaults to
    /// an in-memory store.
    pub storage: Option<Arc<dyn Storage>>,
    /// Tunables; defaults to [`EngineConfig::default`].
    pub config: Option<EngineConfig>,
    /// This process's peer identity. A random one is minted if omitted and
    /// none was recorded in the bundle's storage entries.
    pub peer_id: Option<String>,
}

/// Options accepted by [`Engine::from_storage`].
#[derive(Default)]
pub struct FromStorageOptions {
    /// Tunables; defaults to [`EngineConfig::default`].
    pub config: Option<EngineConfig>,
}

struct PeerHandle {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// A workspace: document storage, the VFS built over it, and zero or more
/// live peer connections, behind one handle.
///
/// `Engine` is meant to be held behind an `Arc` (every constructor returns
/// one) so peer sessions, spawned as background tasks, can share it without
/// lifetime gymnastics. Every method after [`Engine::close`] returns
/// [`Error::Closed`].
pub struct Engine {
    store: Arc<DocumentStore>,
    vfs: Arc<Vfs>,
    config: EngineConfig,
    peer_id: String,
    delta_tx: broadcast::Sender<Delta>,
    sessions: Mutex<HashMap<PeerId, PeerHandle>>,
    next_peer_session_id: AtomicU64,
    closed: AtomicBool,
}

impl Engine {
    /// Create a brand new workspace with a freshly minted root document id.
    pub fn create(options: CreateOptions) -> Result<Arc<Self>> {
        let storage = options
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn Storage>);
        let store = DocumentStore::open(storage)?;

        let root_id = DocumentId::new();
        store.set_root_id(&root_id)?;

        let peer_id = options.peer_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        store.set_peer_id(&peer_id)?;

        let engine = Self::assemble(store, options.config.unwrap_or_default(), peer_id);
        log::info!("engine created, peer_id={}", engine.peer_id);
        Ok(engine)
    }

    /// Rehydrate a workspace from a bundle's bytes into `storage` (defaults
    /// to a fresh in-memory store).
    pub fn from_bundle(bytes: &[u8], options: FromBundleOptions) -> Result<Arc<Self>> {
        let storage = options
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()) as Arc<dyn Storage>);
        let root_id = bundle::from_bytes(bytes, storage.as_ref())?;

        let store = DocumentStore::open(Arc::clone(&storage))?;
        if store.root_id()?.is_none() {
            store.set_root_id(&root_id)?;
        }

        let peer_id = match store.peer_id()? {
            Some(existing) => existing,
            None => {
                let minted = options.peer_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                store.set_peer_id(&minted)?;
                minted
            }
        };

        let engine = Self::assemble(store, options.config.unwrap_or_default(), peer_id);
        log::info!("engine loaded from bundle, root_id={root_id:?}");
        Ok(engine)
    }

    /// Attach to a workspace that already exists in `storage` (its root and
    /// peer identity must already be persisted — see [`Engine::create`]).
    pub fn from_storage(storage: Arc<dyn Storage>, options: FromStorageOptions) -> Result<Arc<Self>> {
        let store = DocumentStore::open(Arc::clone(&storage))?;
        store
            .root_id()?
            .ok_or_else(|| Error::NotFound("workspace root id".to_string()))?;
        let peer_id = store
            .peer_id()?
            .ok_or_else(|| Error::NotFound("workspace peer id".to_string()))?;

        let engine = Self::assemble(store, options.config.unwrap_or_default(), peer_id);
        log::info!("engine attached to existing storage, peer_id={}", engine.peer_id);
        Ok(engine)
    }

    fn assemble(store: DocumentStore, config: EngineConfig, peer_id: String) -> Arc<Self> {
        let store = Arc::new(store);
        let (delta_tx, _rx) = broadcast::channel(config.reconnect_buffer_size.max(1));

        let mut vfs = Vfs::new(Arc::clone(&store), config.resolver_cache_capacity);
        let sink_tx = delta_tx.clone();
        vfs.set_delta_sink(Arc::new(move |delta: Delta| {
            // No receivers (no connected peers) is the common case, not an
            // error — the delta simply has nowhere to go yet.
            let _ = sink_tx.send(delta);
        }));

        Arc::new(Self {
            store,
            vfs: Arc::new(vfs),
            config,
            peer_id,
            delta_tx,
            sessions: Mutex::new(HashMap::new()),
            next_peer_session_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// The async-facing VFS for this workspace.
    pub fn vfs(&self) -> Result<AsyncVfs> {
        self.ensure_open()?;
        Ok(AsyncVfs::new(Arc::clone(&self.vfs)))
    }

    /// This process's stable peer identity.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Begin driving a peer session over `transport`. The session runs on
    /// its own spawned task until the transport closes, `disconnect_peer`
    /// is called, or reconnect attempts are exhausted.
    pub fn connect_peer(&self, transport: Arc<dyn Transport>) -> Result<PeerId> {
        self.ensure_open()?;

        let id = PeerId(self.next_peer_session_id.fetch_add(1, Ordering::SeqCst));
        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(session::run(
            self.peer_id.clone(),
            transport,
            Arc::clone(&self.vfs),
            self.delta_tx.subscribe(),
            self.config.clone(),
            Arc::clone(&cancelled),
        ));

        self.sessions
            .lock()
            .unwrap()
            .insert(id, PeerHandle { cancelled, task });
        log::debug!("connected peer session {id:?}");
        Ok(id)
    }

    /// Tear down a connected peer session. Idempotent: disconnecting an
    /// unknown or already-disconnected `id` is not an error.
    pub fn disconnect_peer(&self, id: PeerId) -> Result<()> {
        if let Some(handle) = self.sessions.lock().unwrap().remove(&id) {
            handle.cancelled.store(true, Ordering::SeqCst);
            handle.task.abort();
            log::debug!("disconnected peer session {id:?}");
        }
        Ok(())
    }

    /// Every storage entry this workspace currently holds, packed into a
    /// deterministic bundle. See [`crate::bundle::to_bytes`].
    pub fn to_bytes(&self, manifest_fields: ManifestFields) -> Result<Vec<u8>> {
        self.ensure_open()?;
        bundle::to_bytes(&self.store, manifest_fields)
    }

    /// A manifest-plus-tree-only bundle, enough to discover the workspace's
    /// identity and continue sync with a live peer. See
    /// [`crate::bundle::create_slim_bundle`].
    pub fn create_slim_bundle(&self, manifest_fields: ManifestFields) -> Result<Vec<u8>> {
        self.ensure_open()?;
        bundle::create_slim_bundle(&self.store, manifest_fields)
    }

    /// Parse a bundle's manifest without attaching it to this engine.
    pub fn read_bundle_manifest(bytes: &[u8]) -> Result<Manifest> {
        bundle::read_manifest(bytes)
    }

    /// Disconnect every peer session, persist any content documents loaded
    /// but not yet flushed, and mark the engine closed. Calling `close`
    /// again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sessions: Vec<(PeerId, PeerHandle)> = self.sessions.lock().unwrap().drain().collect();
        for (id, handle) in sessions {
            handle.cancelled.store(true, Ordering::SeqCst);
            handle.task.abort();
            log::debug!("closed engine: tore down peer session {id:?}");
        }

        self.store.save_tree()?;
        for id in self.store.loaded_content_ids() {
            self.store.save_content(&id)?;
        }
        log::info!("engine closed, peer_id={}", self.peer_id);
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::duplex;
    use crate::value::Value;

    fn fields() -> ManifestFields {
        ManifestFields {
            name: "test-workspace".to_string(),
            created_at_ms: 0,
            entrypoints: vec!["/".to_string()],
            network_uris: None,
        }
    }

    #[tokio::test]
    async fn create_gives_a_usable_vfs() {
        let engine = Engine::create(CreateOptions::default()).unwrap();
        let vfs = engine.vfs().unwrap();
        vfs.create_file("/a.md", Value::empty_object()).await.unwrap();
        assert!(vfs.exists("/a.md").await.unwrap());
    }

    #[tokio::test]
    async fn operations_fail_with_closed_after_close() {
        let engine = Engine::create(CreateOptions::default()).unwrap();
        engine.close().unwrap();
        assert!(matches!(engine.vfs(), Err(Error::Closed)));
        assert!(matches!(engine.to_bytes(fields()), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let engine = Engine::create(CreateOptions::default()).unwrap();
        engine.close().unwrap();
        engine.close().unwrap();
    }

    #[tokio::test]
    async fn bundle_round_trip_through_from_bundle() {
        let engine = Engine::create(CreateOptions::default()).unwrap();
        let vfs = engine.vfs().unwrap();
        vfs.create_directory("/notes").await.unwrap();
        vfs.create_file("/notes/a.md", Value::empty_object()).await.unwrap();
        let bytes = engine.to_bytes(fields()).unwrap();

        let restored = Engine::from_bundle(&bytes, FromBundleOptions::default()).unwrap();
        let restored_vfs = restored.vfs().unwrap();
        assert!(restored_vfs.exists("/notes/a.md").await.unwrap());
    }

    #[tokio::test]
    async fn from_storage_requires_existing_root() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let err = Engine::from_storage(storage, FromStorageOptions::default());
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn connected_peers_converge_a_file_creation() {
        let engine_a = Engine::create(CreateOptions::default()).unwrap();
        let engine_b = Engine::create(CreateOptions::default()).unwrap();
        let (transport_a, transport_b) = duplex();
        engine_a.connect_peer(Arc::new(transport_a)).unwrap();
        engine_b.connect_peer(Arc::new(transport_b)).unwrap();

        engine_a
            .vfs()
            .unwrap()
            .create_file("/a.md", Value::empty_object())
            .await
            .unwrap();

        // Give the spawned session tasks a chance to exchange the handshake
        // and the resulting tree delta.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert!(engine_b.vfs().unwrap().exists("/a.md").await.unwrap());
    }
}
