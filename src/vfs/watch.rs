//! Watcher Registry: path-scoped change notification.
//!
//! Modeled on `fs/callback_registry.rs`'s `CallbackRegistry`:
//! listeners are opaque closures invoked synchronously from whichever
//! thread performed the mutation, each wrapped in `catch_unwind` so a
//! panicking listener cannot take down the caller or poison other
//! listeners' delivery. Subtree watches attach lazily — there is no
//! separate "arm a subtree" step against the tree; a subscription simply
//! matches any changed path with its own path as a prefix, firing with the
//! specific path that changed (per-file content edits included, not just
//! tree-shape changes).

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// What happened to the path in a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A file or directory was created.
    Created,
    /// A file's content changed.
    Modified,
    /// A file or directory was deleted.
    Deleted,
    /// A file or directory was moved from elsewhere to this path (the
    /// matching source-side removal fires as `Deleted` on its old path).
    Moved,
}

/// A single notification delivered to a listener.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// The normalized, absolute path that changed.
    pub path: String,
    /// What happened.
    pub kind: ChangeKind,
}

/// Opaque handle returned by `subscribe_*`, used to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

enum Scope {
    File(String),
    Subtree(String),
}

impl Scope {
    fn matches(&self, changed_path: &str) -> bool {
        match self {
            Scope::File(p) => p == changed_path,
            Scope::Subtree(p) => {
                p == changed_path
                    || (changed_path.starts_with(p.as_str())
                        && (p == "/" || changed_path[p.len()..].starts_with('/')))
            }
        }
    }
}

struct Subscription {
    scope: Scope,
    listener: Listener,
}

/// Registry of path-scoped listeners.
#[derive(Default)]
pub struct WatcherRegistry {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
}

impl WatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes at exactly `path` (no descendants).
    pub fn subscribe_file(
        &self,
        path: impl Into<String>,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.insert(Scope::File(path.into()), Box::new(listener))
    }

    /// Subscribe to changes at `path` or anywhere beneath it.
    pub fn subscribe_subtree(
        &self,
        path: impl Into<String>,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.insert(Scope::Subtree(path.into()), Box::new(listener))
    }

    fn insert(&self, scope: Scope, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, Subscription { scope, listener });
        id
    }

    /// Remove a subscription. Unsubscribing an already-removed id is not an
    /// error.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.lock().unwrap().remove(&id);
    }

    /// Notify every matching listener that `path` changed. Each listener
    /// runs inside `catch_unwind`; a panic is swallowed so it cannot disrupt
    /// delivery to the remaining listeners or propagate to the caller that
    /// performed the mutation.
    pub fn notify(&self, path: &str, kind: ChangeKind) {
        let event = ChangeEvent {
            path: path.to_string(),
            kind,
        };
        let subscriptions = self.subscriptions.lock().unwrap();
        for sub in subscriptions.values() {
            if sub.scope.matches(path) {
                let listener = &sub.listener;
                let event_ref = &event;
                let _ = catch_unwind(AssertUnwindSafe(|| listener(event_ref)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn file_subscription_only_fires_on_exact_path() {
        let registry = WatcherRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        registry.subscribe_file("/a.md", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify("/b.md", ChangeKind::Modified);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        registry.notify("/a.md", ChangeKind::Modified);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subtree_subscription_fires_on_nested_changes() {
        let registry = WatcherRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        registry.subscribe_subtree("/notes", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify("/notes/a.md", ChangeKind::Created);
        registry.notify("/notes/nested/b.md", ChangeKind::Modified);
        registry.notify("/other/a.md", ChangeKind::Created);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn root_subtree_matches_everything() {
        let registry = WatcherRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        registry.subscribe_subtree("/", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        registry.notify("/anything/here.md", ChangeKind::Created);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = WatcherRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let id = registry.subscribe_file("/a.md", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        registry.unsubscribe(id);
        registry.notify("/a.md", ChangeKind::Modified);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry = WatcherRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        registry.subscribe_file("/a.md", |_| panic!("boom"));
        registry.subscribe_file("/a.md", move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });
        registry.notify("/a.md", ChangeKind::Modified);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
