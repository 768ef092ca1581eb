//! Document Store: CRDT documents and their persistence.
//!
//! Two kinds of CRDT document make up a workspace, mirroring `WorkspaceCrdt`'s
//! split between the file tree and a per-file body
//! document: [`tree::TreeDoc`] holds the VFS namespace (directories, and for
//! each file a pointer to its content document), and [`content::ContentDoc`]
//! holds one file's structured content. Both follow the same update-diffing
//! pattern: snapshot the state vector before a mutation, mutate inside a
//! write transaction, then diff-encode the update since the pre-mutation
//! vector as the delta to persist and fan out to peers.

pub mod content;
pub mod store;
pub mod tree;

use std::fmt;

/// Identifier for a content document, distinct from the path that currently
/// names it in the tree (a file keeps its identity across `rename`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    /// Mint a fresh, random document id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing id string (round-tripping from storage or the wire).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first two hex characters, used as the storage shard directory.
    pub fn shard(&self) -> &str {
        &self.0[..self.0.len().min(2)]
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
