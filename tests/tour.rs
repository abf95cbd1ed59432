//! End-to-end tour against the in-process service

use bytes::Bytes;
use coordkv::client::{
    DeleteOptions, DeleteResponse, EventKind, GetOptions, GetResponse, KeepAlive, KvBackend,
    LeaseGrant, LeaseId, MemoryBackend, MemoryCluster, PutOptions, PutResponse, Session,
    Subscription, WatchOptions,
};
use coordkv::common::{TourConfig, TourRecord};
use coordkv::{tour, Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-process service that refuses writes bound to a lease
struct RefuseLeasedPuts {
    inner: MemoryBackend,
    refused: Arc<Mutex<Option<LeaseId>>>,
}

#[tonic::async_trait]
impl KvBackend for RefuseLeasedPuts {
    async fn put(&self, key: Bytes, value: Bytes, options: PutOptions) -> Result<PutResponse> {
        if let Some(lease) = options.lease {
            *self.refused.lock().unwrap() = Some(lease);
            return Err(Error::Request("leased writes are disabled".into()));
        }
        self.inner.put(key, value, options).await
    }

    async fn get(&self, key: Bytes, options: GetOptions) -> Result<GetResponse> {
        self.inner.get(key, options).await
    }

    async fn delete(&self, key: Bytes, options: DeleteOptions) -> Result<DeleteResponse> {
        self.inner.delete(key, options).await
    }

    async fn watch(&self, key: Bytes, options: WatchOptions) -> Result<Subscription> {
        self.inner.watch(key, options).await
    }

    async fn grant(&self, ttl: i64) -> Result<LeaseGrant> {
        self.inner.grant(ttl).await
    }

    async fn keep_alive(&self, id: LeaseId) -> Result<KeepAlive> {
        self.inner.keep_alive(id).await
    }

    async fn revoke(&self, id: LeaseId) -> Result<()> {
        self.inner.revoke(id).await
    }

    async fn time_to_live(&self, id: LeaseId) -> Result<Option<i64>> {
        self.inner.time_to_live(id).await
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }
}

#[tokio::test(start_paused = true)]
async fn test_tour_with_defaults() {
    let cluster = MemoryCluster::new();
    let session = Session::new(cluster.connect(), Duration::from_secs(5));

    let report = tour::run(&session, &TourConfig::default()).await.unwrap();

    assert_eq!(report.fetched.len(), 1);
    assert_eq!(report.fetched[0].value_str(), "www.tizi365.com");

    let listed: Vec<String> = report.listed.iter().map(|kv| kv.key_str()).collect();
    assert_eq!(listed, vec!["/tizi365/name", "/tizi365/url"]);

    assert_eq!(report.deleted_exact, 1);
    assert_eq!(report.deleted_prefix, 1);
    assert!(report.keep_alive_acks >= 1);
    assert!(report.after_revoke.is_empty());

    let key_kinds: Vec<EventKind> = report.key_events.iter().map(|e| e.kind).collect();
    assert_eq!(key_kinds, vec![EventKind::Put, EventKind::Delete]);
    assert_eq!(
        report.key_events[1].prev_kv.as_ref().unwrap().value_str(),
        "www.tizi365.com"
    );

    assert_eq!(report.namespace_events.len(), 4);
    assert!(report.namespace_events.iter().all(|e| e.prev_kv.is_none()));

    let lease_kinds: Vec<EventKind> = report.lease_key_events.iter().map(|e| e.kind).collect();
    assert_eq!(lease_kinds, vec![EventKind::Put, EventKind::Delete]);
    assert_eq!(report.lease_key_events[0].kv.lease_id(), Some(report.lease));

    // Nothing is left behind
    assert!(cluster.is_empty());
    assert_eq!(cluster.watcher_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tour_with_custom_records() {
    let cluster = MemoryCluster::new();
    let session = Session::new(cluster.connect(), Duration::from_secs(5));

    let config = TourConfig {
        namespace: "/a/".into(),
        records: vec![
            TourRecord {
                key: "/a/b".into(),
                value: "1".into(),
            },
            TourRecord {
                key: "/a/c".into(),
                value: "2".into(),
            },
            TourRecord {
                key: "/a/d".into(),
                value: "3".into(),
            },
        ],
        lease_key: "/lease/k".into(),
        revoke_delay: Duration::from_millis(100),
        ..Default::default()
    };

    let report = tour::run(&session, &config).await.unwrap();
    assert_eq!(report.listed.len(), 3);
    assert_eq!(report.deleted_exact, 1);
    assert_eq!(report.deleted_prefix, 2);
    assert_eq!(report.namespace_events.len(), 6);
}

#[tokio::test]
async fn test_tour_rejects_invalid_config() {
    let cluster = MemoryCluster::new();
    let session = Session::new(cluster.connect(), Duration::from_secs(5));

    let config = TourConfig {
        records: Vec::new(),
        ..Default::default()
    };
    assert!(tour::run(&session, &config).await.is_err());
    assert!(cluster.is_empty());
}

#[tokio::test]
async fn test_tour_fails_fast_on_closed_session() {
    let cluster = MemoryCluster::new();
    let session = Session::new(cluster.connect(), Duration::from_secs(5));
    session.close();

    let err = tour::run(&session, &TourConfig::default()).await.unwrap_err();
    assert!(err.is_connection_error());
}

#[tokio::test(start_paused = true)]
async fn test_failed_tour_stops_heartbeats() {
    let cluster = MemoryCluster::new();
    let refused = Arc::new(Mutex::new(None));
    let backend = RefuseLeasedPuts {
        inner: cluster.connect(),
        refused: refused.clone(),
    };
    let session = Session::new(backend, Duration::from_secs(5));

    let config = TourConfig {
        lease_ttl: 2,
        ..Default::default()
    };
    let err = tour::run(&session, &config).await.unwrap_err();
    assert!(matches!(err, Error::Request(_)));

    let lease = refused.lock().unwrap().expect("leased put was attempted");

    // The session is still open; only the abandoned keep-alive could keep the lease up
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!session.is_closed());
    assert_eq!(session.time_to_live(lease).await.unwrap(), None);
}
