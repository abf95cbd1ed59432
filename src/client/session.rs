//! Session: the client facade
//!
//! A session owns one backend connection. Unary calls are bounded by the
//! request timeout and fail fast: there is no retry and no backoff, the error
//! goes straight back to the caller. Watch and keep-alive feeds opened through
//! the session end when it is closed or dropped.

use crate::client::{
    DeleteOptions, DeleteResponse, EtcdBackend, GetOptions, GetResponse, KeepAlive, KvBackend,
    LeaseGrant, LeaseId, PutOptions, PutResponse, Subscription, WatchOptions,
};
use crate::common::{display_bytes, format_duration, validate_key, ClientConfig, Error, Result};
use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct Session<B: KvBackend> {
    backend: B,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl Session<EtcdBackend> {
    /// Connect to the etcd cluster described by `config`.
    ///
    /// Fails with [`Error::Connection`] when no endpoint answers within the
    /// dial timeout.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let backend = EtcdBackend::connect(config).await?;
        Ok(Self::new(backend, config.request_timeout))
    }
}

impl<B: KvBackend> Session<B> {
    pub fn new(backend: B, request_timeout: Duration) -> Self {
        Self {
            backend,
            request_timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn bounded<T>(&self, op: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} did not complete within {}",
                op,
                format_duration(self.request_timeout)
            ))),
        }
    }

    /// Write or overwrite `key`, optionally binding it to a lease
    pub async fn put(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        options: PutOptions,
    ) -> Result<PutResponse> {
        let key = Bytes::copy_from_slice(key.as_ref());
        validate_key(&key)?;
        let value = Bytes::copy_from_slice(value.as_ref());

        let resp = self
            .bounded("put", self.backend.put(key.clone(), value, options))
            .await?;
        tracing::debug!("put {} (revision {})", display_bytes(&key), resp.revision);
        Ok(resp)
    }

    /// Exact lookup (0 or 1 record) or prefix scan in key order
    pub async fn get(&self, key: impl AsRef<[u8]>, options: GetOptions) -> Result<GetResponse> {
        let key = Bytes::copy_from_slice(key.as_ref());
        if !options.prefix {
            validate_key(&key)?;
        }

        let resp = self
            .bounded("get", self.backend.get(key.clone(), options))
            .await?;
        tracing::debug!(
            "get {}{} -> {} record(s)",
            display_bytes(&key),
            if options.prefix { "*" } else { "" },
            resp.kvs.len()
        );
        Ok(resp)
    }

    /// Exact or prefix deletion; reports how many records went away
    pub async fn delete(
        &self,
        key: impl AsRef<[u8]>,
        options: DeleteOptions,
    ) -> Result<DeleteResponse> {
        let key = Bytes::copy_from_slice(key.as_ref());
        if !options.prefix {
            validate_key(&key)?;
        }

        let resp = self
            .bounded("delete", self.backend.delete(key.clone(), options))
            .await?;
        tracing::debug!(
            "delete {}{} -> {} deleted",
            display_bytes(&key),
            if options.prefix { "*" } else { "" },
            resp.deleted
        );
        Ok(resp)
    }

    /// Subscribe to changes of a key or key range.
    ///
    /// Only establishing the watch is bounded by the request timeout; the
    /// subscription itself lives until cancelled or until the session closes.
    pub async fn watch(&self, key: impl AsRef<[u8]>, options: WatchOptions) -> Result<Subscription> {
        let key = Bytes::copy_from_slice(key.as_ref());
        if !options.prefix {
            validate_key(&key)?;
        }

        let subscription = self
            .bounded("watch", self.backend.watch(key.clone(), options))
            .await?;
        tracing::debug!("watching {}", display_bytes(&key));
        Ok(subscription)
    }

    /// Create a lease of `ttl` seconds
    pub async fn grant(&self, ttl: i64) -> Result<LeaseGrant> {
        let grant = self.bounded("grant", self.backend.grant(ttl)).await?;
        tracing::debug!("granted lease {} (ttl {}s)", grant.id, grant.ttl);
        Ok(grant)
    }

    /// Start heartbeating `id`. Heartbeats stop when the returned feed is
    /// cancelled or dropped; the lease then expires at its TTL.
    pub async fn keep_alive(&self, id: LeaseId) -> Result<KeepAlive> {
        let feed = self
            .bounded("keep-alive", self.backend.keep_alive(id))
            .await?;
        tracing::debug!("keep-alive started for lease {}", id);
        Ok(feed)
    }

    /// Delete the lease and every record bound to it
    pub async fn revoke(&self, id: LeaseId) -> Result<()> {
        self.bounded("revoke", self.backend.revoke(id)).await?;
        tracing::debug!("revoked lease {}", id);
        Ok(())
    }

    /// Remaining TTL of `id` in seconds, `None` if it no longer exists
    pub async fn time_to_live(&self, id: LeaseId) -> Result<Option<i64>> {
        self.bounded("time-to-live", self.backend.time_to_live(id))
            .await
    }

    /// Release the connection and end every feed opened through it.
    /// Later calls fail with [`Error::SessionClosed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.backend.shutdown();
            tracing::debug!("session closed");
        }
    }
}

impl<B: KvBackend> Drop for Session<B> {
    fn drop(&mut self) {
        self.close();
    }
}
