//! Guided tour of the client API
//!
//! Runs put/get/delete (exact and prefix), watches and a lease with
//! keep-alive and revocation against any backend, logging every outcome.
//! Errors are returned to the caller as soon as they happen.

use crate::client::{
    CancelHandle, DeleteOptions, GetOptions, KeepAlive, KeyValue, KvBackend, LeaseId, PutOptions,
    Session, Subscription, WatchEvent, WatchOptions,
};
use crate::common::{Error, Result, TourConfig};
use tokio::task::JoinHandle;

/// What the tour observed
#[derive(Debug)]
pub struct TourReport {
    /// Exact read of the first record
    pub fetched: Vec<KeyValue>,
    /// Prefix read of the namespace, in key order
    pub listed: Vec<KeyValue>,
    pub deleted_exact: i64,
    pub deleted_prefix: i64,
    pub lease: LeaseId,
    /// Renewals acknowledged before keep-alive was cancelled
    pub keep_alive_acks: usize,
    /// Read of the lease key after revocation; empty when the cascade worked
    pub after_revoke: Vec<KeyValue>,
    /// Events seen by the exact watch on the first record
    pub key_events: Vec<WatchEvent>,
    /// Events seen by the prefix watch on the namespace
    pub namespace_events: Vec<WatchEvent>,
    /// Events seen by the watch on the lease key
    pub lease_key_events: Vec<WatchEvent>,
}

/// A feed drained by its own task; cancelled when dropped
struct Drain<T> {
    cancel: CancelHandle,
    task: Option<JoinHandle<Result<T>>>,
}

impl<T> Drain<T> {
    /// Cancel the feed and collect what the task saw
    async fn finish(mut self) -> Result<T> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::Other(format!("background task failed: {}", e)))?,
            None => Err(Error::Other("background task already joined".into())),
        }
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn drain_watch(label: String, mut subscription: Subscription) -> Drain<Vec<WatchEvent>> {
    let cancel = subscription.cancel_handle();
    let task = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(batch) = subscription.next().await {
            for event in batch?.events {
                tracing::info!("[watch {}] {}", label, event);
                seen.push(event);
            }
        }
        Ok::<_, Error>(seen)
    });
    Drain {
        cancel,
        task: Some(task),
    }
}

fn drain_heartbeats(mut keep_alive: KeepAlive) -> Drain<usize> {
    let cancel = keep_alive.cancel_handle();
    let task = tokio::spawn(async move {
        let mut acks = 0;
        while let Some(ack) = keep_alive.next().await {
            let ack = ack?;
            tracing::info!("Lease {} renewed (ttl {}s)", ack.id, ack.ttl);
            acks += 1;
        }
        Ok::<_, Error>(acks)
    });
    Drain {
        cancel,
        task: Some(task),
    }
}

/// Run the tour on `session`
pub async fn run<B: KvBackend>(session: &Session<B>, config: &TourConfig) -> Result<TourReport> {
    config.validate()?;
    let first = &config.records[0];
    tracing::info!("Starting tour in namespace {}", config.namespace);

    // Watches go first so they observe every change below
    let key_watch = drain_watch(
        first.key.clone(),
        session
            .watch(&first.key, WatchOptions::new().with_prev_kv())
            .await?,
    );
    let namespace_watch = drain_watch(
        format!("{}*", config.namespace),
        session
            .watch(&config.namespace, WatchOptions::new().with_prefix())
            .await?,
    );
    let lease_watch = drain_watch(
        config.lease_key.clone(),
        session
            .watch(&config.lease_key, WatchOptions::new().with_prev_kv())
            .await?,
    );

    // Put
    for record in &config.records {
        let resp = session
            .put(&record.key, &record.value, PutOptions::new())
            .await?;
        tracing::info!(
            "Put {} = {} (revision {})",
            record.key,
            record.value,
            resp.revision
        );
    }

    // Get, exact then by prefix
    let fetched = session.get(&first.key, GetOptions::new()).await?.kvs;
    for kv in &fetched {
        tracing::info!("{}", kv);
    }
    let listed = session
        .get(&config.namespace, GetOptions::new().with_prefix())
        .await?
        .kvs;
    for kv in &listed {
        tracing::info!("{}", kv);
    }

    // Delete, exact then by prefix
    let deleted_exact = session
        .delete(&first.key, DeleteOptions::new())
        .await?
        .deleted;
    tracing::info!("Deleted {} record(s) at {}", deleted_exact, first.key);
    let deleted_prefix = session
        .delete(&config.namespace, DeleteOptions::new().with_prefix())
        .await?
        .deleted;
    tracing::info!(
        "Deleted {} record(s) under {}",
        deleted_prefix,
        config.namespace
    );

    // Lease
    let grant = session.grant(config.lease_ttl).await?;
    tracing::info!("Granted lease {} (ttl {}s)", grant.id, grant.ttl);

    let mut keep_alive = session.keep_alive(grant.id).await?;
    let first_ack = match tokio::time::timeout(session.request_timeout(), keep_alive.next()).await
    {
        Ok(Some(ack)) => ack?,
        Ok(None) => return Err(Error::LeaseNotFound(grant.id)),
        Err(_) => {
            return Err(Error::Timeout(format!(
                "no keep-alive acknowledgement for lease {}",
                grant.id
            )))
        }
    };
    tracing::info!("Lease {} renewed (ttl {}s)", first_ack.id, first_ack.ttl);
    let heartbeats = drain_heartbeats(keep_alive);

    let resp = session
        .put(
            &config.lease_key,
            &config.lease_value,
            PutOptions::new().with_lease(grant.id),
        )
        .await?;
    tracing::info!(
        "Put {} = {} bound to lease {} (revision {})",
        config.lease_key,
        config.lease_value,
        grant.id,
        resp.revision
    );

    let keep_alive_acks = 1 + heartbeats.finish().await?;
    tracing::info!("Keep-alive cancelled after {} renewal(s)", keep_alive_acks);

    tokio::time::sleep(config.revoke_delay).await;
    session.revoke(grant.id).await?;
    tracing::info!("Revoked lease {}", grant.id);

    let after_revoke = session.get(&config.lease_key, GetOptions::new()).await?.kvs;
    tracing::info!(
        "{} after revoke: {} record(s)",
        config.lease_key,
        after_revoke.len()
    );

    if !config.linger.is_zero() {
        tracing::info!("Watching for another {:?}", config.linger);
        tokio::time::sleep(config.linger).await;
    }
    tokio::time::sleep(config.watch_settle).await;

    let report = TourReport {
        fetched,
        listed,
        deleted_exact,
        deleted_prefix,
        lease: grant.id,
        keep_alive_acks,
        after_revoke,
        key_events: key_watch.finish().await?,
        namespace_events: namespace_watch.finish().await?,
        lease_key_events: lease_watch.finish().await?,
    };
    tracing::info!("Tour finished");
    Ok(report)
}
