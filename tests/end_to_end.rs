//! Integration tests exercising whole-workspace scenarios: two engines,
//! wired together over an in-memory duplex transport, converging on shared
//! state through the peer protocol driver.

use std::sync::Arc;
use std::time::Duration;

use tonk_core::engine::{CreateOptions, Engine, FromBundleOptions};
use tonk_core::transport::memory::duplex;
use tonk_core::value::{PathSegment, Value};
use tonk_core::bundle::ManifestFields;

async fn connected_pair() -> (Arc<Engine>, Arc<Engine>) {
    let a = Engine::create(CreateOptions::default()).unwrap();
    let b = Engine::create(CreateOptions::default()).unwrap();
    let (ta, tb) = duplex();
    a.connect_peer(Arc::new(ta)).unwrap();
    b.connect_peer(Arc::new(tb)).unwrap();
    (a, b)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn fields(name: &str) -> ManifestFields {
    ManifestFields {
        name: name.to_string(),
        created_at_ms: 0,
        entrypoints: vec!["/".to_string()],
        network_uris: None,
    }
}

#[tokio::test]
async fn two_peer_convergence() {
    let a = Engine::create(CreateOptions::default()).unwrap();
    a.vfs().unwrap().create_directory("/notes").await.unwrap();
    a.vfs()
        .unwrap()
        .create_file("/notes/x", obj(&[("t", Value::String("hello".into()))]))
        .await
        .unwrap();

    let b = Engine::create(CreateOptions::default()).unwrap();
    let (ta, tb) = duplex();
    a.connect_peer(Arc::new(ta)).unwrap();
    b.connect_peer(Arc::new(tb)).unwrap();
    settle().await;

    let read = b.vfs().unwrap().read_file("/notes/x").await.unwrap();
    assert_eq!(read.to_json(), serde_json::json!({"t": "hello"}));
}

#[tokio::test]
async fn concurrent_directory_insert_converges_to_one_entry() {
    let a = Engine::create(CreateOptions::default()).unwrap();
    let b = Engine::create(CreateOptions::default()).unwrap();
    a.vfs().unwrap().create_directory("/shared").await.unwrap();

    // Sync the baseline (the shared directory itself) before going offline.
    let (ta, tb) = duplex();
    let peer_on_a = a.connect_peer(Arc::new(ta)).unwrap();
    let peer_on_b = b.connect_peer(Arc::new(tb)).unwrap();
    settle().await;
    assert!(b.vfs().unwrap().exists("/shared").await.unwrap());

    // Both offline: each creates the same name with different content.
    a.disconnect_peer(peer_on_a).unwrap();
    b.disconnect_peer(peer_on_b).unwrap();
    a.vfs()
        .unwrap()
        .create_file("/shared/msg", obj(&[("from", Value::String("a".into()))]))
        .await
        .unwrap();
    b.vfs()
        .unwrap()
        .create_file("/shared/msg", obj(&[("from", Value::String("b".into()))]))
        .await
        .unwrap();

    let (ta2, tb2) = duplex();
    a.connect_peer(Arc::new(ta2)).unwrap();
    b.connect_peer(Arc::new(tb2)).unwrap();
    settle().await;

    let a_children = a.vfs().unwrap().list_directory("/shared").await.unwrap();
    let b_children = b.vfs().unwrap().list_directory("/shared").await.unwrap();
    assert_eq!(a_children.len(), 1, "exactly one msg entry survives on A");
    assert_eq!(b_children.len(), 1, "exactly one msg entry survives on B");

    let a_content = a.vfs().unwrap().read_file("/shared/msg").await.unwrap();
    let b_content = b.vfs().unwrap().read_file("/shared/msg").await.unwrap();
    assert_eq!(a_content, b_content, "both peers resolve the collision identically");
}

#[tokio::test]
async fn text_co_editing_converges() {
    let (a, b) = connected_pair().await;
    a.vfs()
        .unwrap()
        .create_file("/doc", obj(&[("body", Value::Text("Hello".into()))]))
        .await
        .unwrap();
    settle().await;
    assert!(b.vfs().unwrap().exists("/doc").await.unwrap());

    let body_path = vec![PathSegment::ObjectKey("body".to_string())];
    let (a_vfs, b_vfs) = (a.vfs().unwrap(), b.vfs().unwrap());
    tokio::join!(
        a_vfs.splice_text("/doc", &body_path, 5, 0, " World"),
        b_vfs.splice_text("/doc", &body_path, 0, 0, "Say: "),
    );
    settle().await;

    let a_final = a.vfs().unwrap().read_file("/doc").await.unwrap();
    let b_final = b.vfs().unwrap().read_file("/doc").await.unwrap();
    assert_eq!(a_final, b_final);
    assert_eq!(
        a_final.to_json(),
        serde_json::json!({"body": "Say: Hello World"})
    );
}

#[tokio::test]
async fn bundle_round_trip_preserves_tree_and_content() {
    let engine = Engine::create(CreateOptions::default()).unwrap();
    let vfs = engine.vfs().unwrap();
    vfs.create_directory("/notes").await.unwrap();
    vfs.create_file("/notes/a.md", obj(&[("x", Value::Number(1.0))]))
        .await
        .unwrap();
    vfs.create_file("/b.md", obj(&[("x", Value::Number(2.0))]))
        .await
        .unwrap();
    vfs.create_file("/c.md", obj(&[("x", Value::Number(3.0))]))
        .await
        .unwrap();

    let bytes = engine.to_bytes(fields("bundle-test")).unwrap();
    let restored = Engine::from_bundle(&bytes, FromBundleOptions::default()).unwrap();
    let restored_vfs = restored.vfs().unwrap();

    let mut original_children = vfs.list_directory("/").await.unwrap();
    let mut restored_children = restored_vfs.list_directory("/").await.unwrap();
    original_children.sort_by(|x, y| x.0.cmp(&y.0));
    restored_children.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(original_children, restored_children);

    for path in ["/notes/a.md", "/b.md", "/c.md"] {
        assert_eq!(
            vfs.read_file(path).await.unwrap(),
            restored_vfs.read_file(path).await.unwrap(),
            "{path} matches after round-trip",
        );
    }
}

#[tokio::test]
async fn reconnect_resumption_observes_both_writes_exactly_once() {
    let a = Engine::create(CreateOptions::default()).unwrap();
    let b = Engine::create(CreateOptions::default()).unwrap();

    let (ta, tb) = duplex();
    let peer_on_a = a.connect_peer(Arc::new(ta)).unwrap();
    b.connect_peer(Arc::new(tb)).unwrap();
    settle().await;

    a.vfs().unwrap().create_file("/a", Value::empty_object()).await.unwrap();
    settle().await;
    assert!(b.vfs().unwrap().exists("/a").await.unwrap());

    // Disconnect mid-sync, keep writing locally while offline.
    a.disconnect_peer(peer_on_a).unwrap();
    a.vfs().unwrap().create_file("/b", Value::empty_object()).await.unwrap();

    // Reconnect over a fresh transport pair and let the new session's
    // handshake re-announce everything A is tracking.
    let (ta2, tb2) = duplex();
    a.connect_peer(Arc::new(ta2)).unwrap();
    b.connect_peer(Arc::new(tb2)).unwrap();
    settle().await;

    assert!(b.vfs().unwrap().exists("/a").await.unwrap());
    assert!(b.vfs().unwrap().exists("/b").await.unwrap());
}

#[tokio::test]
async fn watcher_fires_exactly_once_on_remote_change() {
    let (a, b) = connected_pair().await;
    b.vfs()
        .unwrap()
        .create_file("/x", obj(&[("v", Value::Number(1.0))]))
        .await
        .unwrap();
    settle().await;
    assert!(a.vfs().unwrap().exists("/x").await.unwrap());

    let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let hits2 = Arc::clone(&hits);
    let sub = a
        .vfs()
        .unwrap()
        .inner()
        .clone()
        .watch_file("/x", move |_| {
            hits2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .unwrap();

    b.vfs()
        .unwrap()
        .update_file("/x", obj(&[("v", Value::Number(2.0))]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(
        a.vfs().unwrap().read_file("/x").await.unwrap().to_json(),
        serde_json::json!({"v": 2.0})
    );

    a.vfs().unwrap().inner().unsubscribe(sub);
}

fn obj(fields: &[(&str, Value)]) -> Value {
    let mut map = indexmap::IndexMap::new();
    for (k, v) in fields {
        map.insert(k.to_string(), v.clone());
    }
    Value::Object(map)
}
