//! Request deadlines against a service that never answers

use bytes::Bytes;
use coordkv::client::{
    DeleteOptions, DeleteResponse, GetOptions, GetResponse, KeepAlive, KvBackend, LeaseGrant,
    LeaseId, PutOptions, PutResponse, Session, Subscription, WatchOptions,
};
use coordkv::{Error, Result};
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Accepts every request and never replies
#[derive(Default)]
struct Stalled {
    shut_down: Arc<AtomicBool>,
}

#[tonic::async_trait]
impl KvBackend for Stalled {
    async fn put(&self, _key: Bytes, _value: Bytes, _options: PutOptions) -> Result<PutResponse> {
        pending().await
    }

    async fn get(&self, _key: Bytes, _options: GetOptions) -> Result<GetResponse> {
        pending().await
    }

    async fn delete(&self, _key: Bytes, _options: DeleteOptions) -> Result<DeleteResponse> {
        pending().await
    }

    async fn watch(&self, _key: Bytes, _options: WatchOptions) -> Result<Subscription> {
        pending().await
    }

    async fn grant(&self, _ttl: i64) -> Result<LeaseGrant> {
        pending().await
    }

    async fn keep_alive(&self, _id: LeaseId) -> Result<KeepAlive> {
        pending().await
    }

    async fn revoke(&self, _id: LeaseId) -> Result<()> {
        pending().await
    }

    async fn time_to_live(&self, _id: LeaseId) -> Result<Option<i64>> {
        pending().await
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_unary_requests_time_out() {
    let session = Session::new(Stalled::default(), Duration::from_secs(5));

    let started = tokio::time::Instant::now();
    let err = session
        .put("/tizi365/url", "www.tizi365.com", PutOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(ref m) if m.contains("put") && m.contains("5s")));
    assert!(err.is_request_error());
    assert!(started.elapsed() >= Duration::from_secs(5));

    assert!(matches!(
        session.get("/k", GetOptions::new()).await,
        Err(Error::Timeout(_))
    ));
    assert!(matches!(session.grant(10).await, Err(Error::Timeout(_))));
    assert!(matches!(
        session.revoke(LeaseId::new(1)).await,
        Err(Error::Timeout(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stream_setup_times_out() {
    let session = Session::new(Stalled::default(), Duration::from_millis(200));

    assert!(matches!(
        session.watch("/k", WatchOptions::new()).await,
        Err(Error::Timeout(_))
    ));
    assert!(matches!(
        session.keep_alive(LeaseId::new(1)).await,
        Err(Error::Timeout(_))
    ));
}

#[tokio::test]
async fn test_drop_releases_backend() {
    let backend = Stalled::default();
    let flag = backend.shut_down.clone();

    {
        let _session = Session::new(backend, Duration::from_secs(1));
    }
    assert!(flag.load(Ordering::SeqCst));
}
