//! Unified error type for `tonk_core` operations.
//!
//! One variant per error taxonomy kind the crate distinguishes. Every
//! fallible path in the crate returns [`Error`] via `?`; nothing in library
//! code unwraps or panics on a reachable error condition.

use serde::Serialize;
use thiserror::Error;

/// Unified error type for VFS, sync, and bundle operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Path or document ID absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create collided with an existing entry.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Operation required a file but the target is a directory.
    #[error("not a file: {0}")]
    NotAFile(String),

    /// Operation required a directory but the target is a file.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Deletion of a non-empty directory without the recursive flag.
    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// Malformed or escaping path.
    #[error("invalid path '{0}': {1}")]
    InvalidPath(String, String),

    /// `spliceText` arguments outside the bounds of the target text.
    #[error("index out of range: start={start} delete_count={delete_count} len={len}")]
    IndexOutOfRange {
        /// Requested splice start, in Unicode scalar units.
        start: usize,
        /// Requested delete count, in Unicode scalar units.
        delete_count: usize,
        /// Length of the text being spliced, in Unicode scalar units.
        len: usize,
    },

    /// Persistence I/O failure. May be transient; callers may retry.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Peer session ended.
    #[error("transport closed")]
    TransportClosed,

    /// A delta from storage or the wire failed to apply to the CRDT engine.
    #[error("invalid change: {0}")]
    InvalidChange(String),

    /// A stored or received CRDT update could not be decoded or applied.
    #[error("corrupted document: {0}")]
    CorruptedDocument(String),

    /// A `RefNode.kind` did not match the `type` of the document it points to.
    #[error("corrupted link at '{0}': ref kind '{1}' does not match target type '{2}'")]
    CorruptedLink(String, String, String),

    /// Bundle has no `manifest.json`, or the manifest is malformed.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// Bundle manifest declares an unsupported codec version.
    #[error("unsupported bundle version: {0}")]
    VersionUnsupported(u32),

    /// A bundle entry could not be read in full.
    #[error("truncated bundle entry: {0}")]
    TruncatedEntry(String),

    /// Operation attempted on a closed `Engine`.
    #[error("engine is closed")]
    Closed,

    /// Caller-cancelled operation.
    #[error("operation cancelled")]
    Cancelled,

    /// General I/O error not otherwise covered above (bundle archive I/O, etc).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure, e.g. in the bundle manifest.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::InvalidBundle(err.to_string())
    }
}

/// Result type alias for `tonk_core` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A serializable representation of [`Error`], for embedding this crate
/// behind a host application's IPC layer.
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
}

impl From<&Error> for SerializableError {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::NotFound(_) => "NotFound",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::NotAFile(_) => "NotAFile",
            Error::NotADirectory(_) => "NotADirectory",
            Error::NotEmpty(_) => "NotEmpty",
            Error::InvalidPath(_, _) => "InvalidPath",
            Error::IndexOutOfRange { .. } => "IndexOutOfRange",
            Error::StorageError(_) => "StorageError",
            Error::TransportClosed => "TransportClosed",
            Error::InvalidChange(_) => "InvalidChange",
            Error::CorruptedDocument(_) => "CorruptedDocument",
            Error::CorruptedLink(_, _, _) => "CorruptedLink",
            Error::InvalidBundle(_) => "InvalidBundle",
            Error::VersionUnsupported(_) => "VersionUnsupported",
            Error::TruncatedEntry(_) => "TruncatedEntry",
            Error::Closed => "Closed",
            Error::Cancelled => "Cancelled",
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
        }
        .to_string();

        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<Error> for SerializableError {
    fn from(err: Error) -> Self {
        SerializableError::from(&err)
    }
}

impl Error {
    /// Convert to a serializable representation for IPC.
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}
