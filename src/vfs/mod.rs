//! Virtual File System: path resolution, file/directory operations, and
//! change notification over the CRDT [`crate::document`] layer.

pub mod async_vfs;
pub mod ops;
pub mod resolver;
pub mod watch;

pub use async_vfs::AsyncVfs;
pub use ops::{Delta, DeltaSink, Vfs};
pub use watch::{ChangeEvent, ChangeKind, SubscriptionId};
