//! Watch delivery: ordering, previous values, prefixes, teardown

use coordkv::client::{
    DeleteOptions, EventKind, MemoryBackend, MemoryCluster, PutOptions, Session, WatchOptions,
};
use futures_util::StreamExt;
use std::time::Duration;

fn session(cluster: &MemoryCluster) -> Session<MemoryBackend> {
    Session::new(cluster.connect(), Duration::from_secs(5))
}

#[tokio::test]
async fn test_put_then_delete_with_prev_value() {
    let cluster = MemoryCluster::new();
    let session = session(&cluster);

    let mut sub = session
        .watch("/tizi365/url", WatchOptions::new().with_prev_kv())
        .await
        .unwrap();

    session
        .put("/tizi365/url", "www.tizi365.com", PutOptions::new())
        .await
        .unwrap();
    session
        .delete("/tizi365/url", DeleteOptions::new())
        .await
        .unwrap();

    let put = sub.next().await.unwrap().unwrap();
    assert_eq!(put.events.len(), 1);
    assert_eq!(put.events[0].kind, EventKind::Put);
    assert_eq!(put.events[0].kv.value_str(), "www.tizi365.com");
    assert!(put.events[0].prev_kv.is_none());

    let delete = sub.next().await.unwrap().unwrap();
    assert!(delete.revision > put.revision);
    let event = &delete.events[0];
    assert_eq!(event.kind, EventKind::Delete);
    assert_eq!(event.kv.key_str(), "/tizi365/url");
    assert_eq!(
        event.prev_kv.as_ref().map(|kv| kv.value_str()),
        Some("www.tizi365.com".to_string())
    );
}

#[tokio::test]
async fn test_prev_value_only_when_requested() {
    let cluster = MemoryCluster::new();
    let session = session(&cluster);
    let mut sub = session.watch("/k", WatchOptions::new()).await.unwrap();

    session.put("/k", "1", PutOptions::new()).await.unwrap();
    session.put("/k", "2", PutOptions::new()).await.unwrap();

    sub.next().await.unwrap().unwrap();
    let second = sub.next().await.unwrap().unwrap();
    assert_eq!(second.events[0].kv.value_str(), "2");
    assert!(second.events[0].prev_kv.is_none());
}

#[tokio::test]
async fn test_exact_watch_ignores_other_keys() {
    let cluster = MemoryCluster::new();
    let session = session(&cluster);
    let mut sub = session.watch("/tizi", WatchOptions::new()).await.unwrap();

    session.put("/tizi365/url", "x", PutOptions::new()).await.unwrap();
    session.put("/tizi", "y", PutOptions::new()).await.unwrap();

    let batch = sub.next().await.unwrap().unwrap();
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].kv.key_str(), "/tizi");
}

#[tokio::test]
async fn test_prefix_watch_sees_range_delete_as_one_batch() {
    let cluster = MemoryCluster::new();
    let session = session(&cluster);
    let mut sub = session
        .watch("/tizi", WatchOptions::new().with_prefix())
        .await
        .unwrap();

    for key in ["/tizi365/url", "/tizi365/name", "/unrelated"] {
        session.put(key, "v", PutOptions::new()).await.unwrap();
    }
    session
        .delete("/tizi365/", DeleteOptions::new().with_prefix())
        .await
        .unwrap();

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let batch = sub.next().await.unwrap().unwrap();
        kinds.push((batch.events[0].kind, batch.events[0].kv.key_str()));
    }
    assert_eq!(
        kinds,
        vec![
            (EventKind::Put, "/tizi365/url".to_string()),
            (EventKind::Put, "/tizi365/name".to_string()),
        ]
    );

    let deletes = sub.next().await.unwrap().unwrap();
    let keys: Vec<String> = deletes.events.iter().map(|e| e.kv.key_str()).collect();
    assert_eq!(keys, vec!["/tizi365/name", "/tizi365/url"]);
    assert!(deletes
        .events
        .iter()
        .all(|e| e.kind == EventKind::Delete && e.kv.mod_revision == deletes.revision));
}

#[tokio::test]
async fn test_lease_revoke_reaches_watchers() {
    let cluster = MemoryCluster::new();
    let session = session(&cluster);
    let mut sub = session
        .watch("/job/v3/1", WatchOptions::new().with_prev_kv())
        .await
        .unwrap();

    let lease = session.grant(10).await.unwrap();
    session
        .put("/job/v3/1", "koock", PutOptions::new().with_lease(lease.id))
        .await
        .unwrap();
    session.revoke(lease.id).await.unwrap();

    let put = sub.next().await.unwrap().unwrap();
    assert_eq!(put.events[0].kv.lease_id(), Some(lease.id));
    let delete = sub.next().await.unwrap().unwrap();
    assert_eq!(delete.events[0].kind, EventKind::Delete);
    assert_eq!(delete.events[0].prev_kv.as_ref().unwrap().value_str(), "koock");
}

#[tokio::test]
async fn test_cancel_stops_delivery() {
    let cluster = MemoryCluster::new();
    let session = session(&cluster);
    let mut sub = session.watch("/c", WatchOptions::new()).await.unwrap();

    session.put("/c", "before", PutOptions::new()).await.unwrap();
    sub.cancel();
    session.put("/c", "after", PutOptions::new()).await.unwrap();

    let queued = sub.next().await.unwrap().unwrap();
    assert_eq!(queued.events[0].kv.value_str(), "before");
    assert!(sub.next().await.is_none());
    assert_eq!(cluster.watcher_count(), 0);
}

#[tokio::test]
async fn test_session_close_ends_subscriptions() {
    let cluster = MemoryCluster::new();
    let watcher = session(&cluster);
    let writer = session(&cluster);

    let handle = {
        let sub = watcher
            .watch("/x/", WatchOptions::new().with_prefix())
            .await
            .unwrap();
        tokio::spawn(async move { sub.into_stream().count().await })
    };

    writer.put("/x/1", "v", PutOptions::new()).await.unwrap();
    tokio::task::yield_now().await;
    watcher.close();
    writer.put("/x/2", "v", PutOptions::new()).await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("subscription should end when its session closes")
        .unwrap();
    assert_eq!(seen, 1);
    assert_eq!(cluster.watcher_count(), 0);
}
