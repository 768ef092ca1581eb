//! Path Resolver: a bounded, generation-invalidated cache over [`TreeDoc`].
//!
//! `TreeDoc::resolve` already only walks as many nested maps as the path has
//! segments, so the cache here exists purely to avoid repeating that walk
//! for hot paths (the same file read or watched repeatedly). Every tree
//! mutation — local or remote — bumps `TreeDoc`'s generation counter; the
//! cache tags every entry with the generation it was resolved under and
//! discards the whole cache on a mismatch rather than tracking per-path
//! invalidation, trading a little redundant re-resolution after a write for
//! a much simpler cache.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::document::tree::{RefNode, TreeDoc};
use crate::error::Result;

struct CacheEntry {
    path: String,
    node: Option<RefNode>,
}

struct CacheState {
    generation: u64,
    entries: VecDeque<CacheEntry>,
}

/// Caches resolved paths against a [`TreeDoc`]'s current generation.
pub struct PathResolver {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl PathResolver {
    /// Create a resolver caching up to `capacity` resolved paths.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState {
                generation: 0,
                entries: VecDeque::new(),
            }),
        }
    }

    /// Resolve `segments` against `tree`, consulting (and updating) the cache.
    pub fn resolve(
        &self,
        tree: &TreeDoc,
        path: &str,
        segments: &[String],
    ) -> Result<Option<RefNode>> {
        let current_generation = tree.generation();
        {
            let mut state = self.state.lock().unwrap();
            if state.generation != current_generation {
                state.entries.clear();
                state.generation = current_generation;
            } else if let Some(entry) = state.entries.iter().find(|e| e.path == path) {
                return Ok(entry.node.clone());
            }
        }

        let resolved = tree.resolve(segments)?;

        let mut state = self.state.lock().unwrap();
        if state.generation == current_generation {
            if state.entries.len() >= self.capacity {
                state.entries.pop_front();
            }
            state.entries.push_back(CacheEntry {
                path: path.to_string(),
                node: resolved.clone(),
            });
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;

    #[test]
    fn caches_hit_until_generation_changes() {
        let mut tree = TreeDoc::new();
        tree.create_file(&[], "a.md", DocumentId::from_string("x")).unwrap();
        let resolver = PathResolver::new(8);

        let segs = vec!["a.md".to_string()];
        let first = resolver.resolve(&tree, "/a.md", &segs).unwrap();
        assert!(first.is_some());

        tree.create_file(&[], "b.md", DocumentId::from_string("y")).unwrap();
        let second = resolver
            .resolve(&tree, "/b.md", &vec!["b.md".to_string()])
            .unwrap();
        assert!(second.is_some());
    }

    #[test]
    fn respects_capacity() {
        let mut tree = TreeDoc::new();
        for i in 0..5 {
            tree.create_file(&[], &format!("f{i}"), DocumentId::from_string(format!("id{i}")))
                .unwrap();
        }
        let resolver = PathResolver::new(2);
        for i in 0..5 {
            let segs = vec![format!("f{i}")];
            resolver.resolve(&tree, &format!("/f{i}"), &segs).unwrap();
        }
        let state = resolver.state.lock().unwrap();
        assert!(state.entries.len() <= 2);
    }
}
