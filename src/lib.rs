#![warn(missing_docs)]

//! A content-addressed, CRDT-backed virtual file system with peer-to-peer
//! synchronization and a portable bundle format.
//!
//! An [`Engine`](engine::Engine) owns a workspace: a namespace tree and a
//! family of per-file content documents ([`document`]), persisted through a
//! pluggable [`storage::Storage`] backend, addressed by path via
//! [`vfs::resolver::PathResolver`] and mutated through [`vfs::Vfs`], which
//! notifies subscribers through [`vfs::watch::WatcherRegistry`]. A workspace
//! can be packed into and restored from a portable archive ([`bundle`]), and
//! kept in sync with other processes over any [`transport::Transport`] via
//! the [`peer`] protocol driver, all wired together by [`engine::Engine`].

/// Bundle Codec: pack and unpack a workspace as a portable archive.
pub mod bundle;

/// Engine tunables: resolver cache size, reconnect backoff, idle timeouts.
pub mod config;

/// Document Store: the namespace tree and per-file content CRDTs.
pub mod document;

/// Sync Engine: the façade composing storage, VFS, and peer sessions.
pub mod engine;

/// Error and result types shared across the crate.
pub mod error;

/// Path normalization and manipulation shared by the resolver and VFS.
pub mod path_utils;

/// Peer Protocol Driver: per-peer handshake, sync, and reconnection.
pub mod peer;

/// Storage capability trait and an in-memory reference implementation.
pub mod storage;

/// Unicode scalar / UTF-16 code unit index conversion for text splices.
pub mod text_index;

/// Transport capability trait and an in-memory reference implementation.
pub mod transport;

/// The structured value type file content is expressed in.
pub mod value;

/// VFS Operations, path resolution, and the watcher registry.
pub mod vfs;

pub use document::DocumentId;
pub use engine::{CreateOptions, Engine, FromBundleOptions, FromStorageOptions};
pub use error::{Error, Result, SerializableError};
pub use peer::PeerId;
pub use vfs::{AsyncVfs, ChangeEvent, ChangeKind, Delta, SubscriptionId, Vfs};
