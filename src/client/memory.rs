//! In-process coordination service
//!
//! [`MemoryCluster`] keeps the whole keyspace in a `BTreeMap` behind one mutex
//! and reproduces the parts of etcd's behaviour the facade relies on:
//! - a global revision, bumped once per mutating request
//! - lexicographic key order for ranges
//! - leases whose expiry or revocation deletes every bound key at one revision
//! - watch batches sent while the lock is held, so each watcher sees changes in
//!   apply order
//!
//! Every [`MemoryBackend`] obtained from [`MemoryCluster::connect`] behaves like
//! a separate client connection: shutting it down removes only its watchers and
//! stops only its keep-alives.

use crate::client::{
    renewal_interval, DeleteOptions, DeleteResponse, EventKind, Feed, GetOptions, GetResponse,
    KeepAlive, KeepAliveAck, KeyRange, KeyValue, KvBackend, LeaseGrant, LeaseId, PutOptions,
    PutResponse, Subscription, WatchBatch, WatchEvent, WatchOptions, MAX_LEASE_TTL,
};
use crate::common::{Error, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// How often expired leases are collected in the background
pub const REAP_INTERVAL: Duration = Duration::from_millis(100);

struct LeaseEntry {
    ttl: i64,
    deadline: Instant,
    keys: BTreeSet<Bytes>,
}

struct Watcher {
    owner: u64,
    range: KeyRange,
    prev_kv: bool,
    tx: mpsc::UnboundedSender<Result<WatchBatch>>,
}

struct State {
    kvs: BTreeMap<Bytes, KeyValue>,
    revision: i64,
    leases: HashMap<LeaseId, LeaseEntry>,
    next_lease: i64,
    watchers: Vec<Watcher>,
}

impl State {
    fn new() -> Self {
        Self {
            kvs: BTreeMap::new(),
            revision: 1,
            leases: HashMap::new(),
            next_lease: 1,
            watchers: Vec::new(),
        }
    }

    fn range(&self, range: &KeyRange) -> impl Iterator<Item = &KeyValue> + '_ {
        let upper = match range.end() {
            Some(end) => Bound::Excluded(Bytes::from(end)),
            None => Bound::Unbounded,
        };
        let lower = Bound::Included(Bytes::copy_from_slice(range.start()));
        self.kvs.range((lower, upper)).map(|(_, kv)| kv)
    }

    fn detach(&mut self, kv: &KeyValue) {
        if let Some(lease) = kv.lease_id() {
            if let Some(entry) = self.leases.get_mut(&lease) {
                entry.keys.remove(&kv.key);
            }
        }
    }

    fn put(&mut self, key: Bytes, value: Bytes, lease: Option<LeaseId>) -> Result<PutResponse> {
        if let Some(id) = lease {
            if !self.leases.contains_key(&id) {
                return Err(Error::LeaseNotFound(id));
            }
        }

        self.revision += 1;
        let revision = self.revision;
        let prev = self.kvs.get(&key).cloned();
        if let Some(prev) = &prev {
            self.detach(prev);
        }

        let kv = KeyValue {
            key: key.clone(),
            value,
            create_revision: prev.as_ref().map_or(revision, |p| p.create_revision),
            mod_revision: revision,
            version: prev.as_ref().map_or(1, |p| p.version + 1),
            lease: lease.map_or(0, LeaseId::get),
        };
        if let Some(entry) = lease.and_then(|id| self.leases.get_mut(&id)) {
            entry.keys.insert(key.clone());
        }
        self.kvs.insert(key, kv.clone());

        self.notify(
            revision,
            vec![WatchEvent {
                kind: EventKind::Put,
                kv,
                prev_kv: prev.clone(),
            }],
        );
        Ok(PutResponse {
            revision,
            prev_kv: prev,
        })
    }

    /// Delete `keys` at a single new revision. A no-op leaves the revision alone.
    fn remove(&mut self, keys: Vec<Bytes>) -> DeleteResponse {
        let removed: Vec<KeyValue> = keys.iter().filter_map(|k| self.kvs.remove(k)).collect();
        if removed.is_empty() {
            return DeleteResponse {
                revision: self.revision,
                ..Default::default()
            };
        }

        self.revision += 1;
        let revision = self.revision;
        let mut events = Vec::with_capacity(removed.len());
        for prev in &removed {
            self.detach(prev);
            events.push(WatchEvent {
                kind: EventKind::Delete,
                kv: KeyValue {
                    key: prev.key.clone(),
                    mod_revision: revision,
                    ..Default::default()
                },
                prev_kv: Some(prev.clone()),
            });
        }
        self.notify(revision, events);

        DeleteResponse {
            revision,
            deleted: removed.len() as i64,
            prev_kvs: removed,
        }
    }

    fn revoke(&mut self, id: LeaseId) -> Result<DeleteResponse> {
        let entry = self.leases.remove(&id).ok_or(Error::LeaseNotFound(id))?;
        Ok(self.remove(entry.keys.into_iter().collect()))
    }

    fn expire(&mut self, now: Instant) {
        let mut expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort();

        for id in expired {
            if let Ok(resp) = self.revoke(id) {
                tracing::debug!("Lease {} expired, {} key(s) removed", id, resp.deleted);
            }
        }
    }

    fn renew(&mut self, id: LeaseId, now: Instant) -> Option<i64> {
        let entry = self.leases.get_mut(&id)?;
        entry.deadline = now + Duration::from_secs(entry.ttl as u64);
        Some(entry.ttl)
    }

    fn notify(&mut self, revision: i64, events: Vec<WatchEvent>) {
        self.watchers.retain(|w| {
            let matching: Vec<WatchEvent> = events
                .iter()
                .filter(|e| w.range.contains(&e.kv.key))
                .map(|e| WatchEvent {
                    prev_kv: if w.prev_kv { e.prev_kv.clone() } else { None },
                    ..e.clone()
                })
                .collect();
            if matching.is_empty() {
                return !w.tx.is_closed();
            }
            w.tx.send(Ok(WatchBatch {
                revision,
                events: matching,
            }))
            .is_ok()
        });
    }
}

struct Inner {
    state: Mutex<State>,
    next_connection: AtomicU64,
}

impl Inner {
    /// Lock the state, collecting leases that ran out first
    fn lock(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.expire(Instant::now());
        state
    }
}

/// Shared in-process service; cheap to clone
#[derive(Clone)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
}

impl MemoryCluster {
    /// Create an empty cluster and start its lease reaper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(State::new()),
            next_connection: AtomicU64::new(1),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => drop(inner.lock()),
                    None => break,
                }
            }
        });

        Self { inner }
    }

    /// Open a new client connection to this cluster
    pub fn connect(&self) -> MemoryBackend {
        let (shutdown, _) = watch::channel(false);
        MemoryBackend {
            cluster: self.clone(),
            id: self.inner.next_connection.fetch_add(1, Ordering::Relaxed),
            shutdown,
        }
    }

    /// Current revision of the keyspace
    pub fn revision(&self) -> i64 {
        self.inner.lock().revision
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.inner.lock().kvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered watchers across all connections
    pub fn watcher_count(&self) -> usize {
        let mut state = self.inner.lock();
        state.watchers.retain(|w| !w.tx.is_closed());
        state.watchers.len()
    }

    fn renew(&self, id: LeaseId) -> Option<i64> {
        self.inner.lock().renew(id, Instant::now())
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// One client connection to a [`MemoryCluster`]
pub struct MemoryBackend {
    cluster: MemoryCluster,
    id: u64,
    shutdown: watch::Sender<bool>,
}

impl MemoryBackend {
    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        if *self.shutdown.borrow() {
            return Err(Error::SessionClosed);
        }
        Ok(self.cluster.inner.lock())
    }
}

#[tonic::async_trait]
impl KvBackend for MemoryBackend {
    async fn put(&self, key: Bytes, value: Bytes, options: PutOptions) -> Result<PutResponse> {
        let mut resp = self.state()?.put(key, value, options.lease)?;
        if !options.prev_kv {
            resp.prev_kv = None;
        }
        Ok(resp)
    }

    async fn get(&self, key: Bytes, options: GetOptions) -> Result<GetResponse> {
        let state = self.state()?;
        let range = KeyRange::new(key, options.prefix);
        let matches: Vec<KeyValue> = state.range(&range).cloned().collect();
        let count = matches.len() as i64;
        let kvs = if options.limit > 0 {
            matches.into_iter().take(options.limit as usize).collect()
        } else {
            matches
        };
        Ok(GetResponse {
            revision: state.revision,
            kvs,
            count,
        })
    }

    async fn delete(&self, key: Bytes, options: DeleteOptions) -> Result<DeleteResponse> {
        let mut state = self.state()?;
        let range = KeyRange::new(key, options.prefix);
        let keys: Vec<Bytes> = state.range(&range).map(|kv| kv.key.clone()).collect();
        let mut resp = state.remove(keys);
        if !options.prev_kv {
            resp.prev_kvs.clear();
        }
        Ok(resp)
    }

    async fn watch(&self, key: Bytes, options: WatchOptions) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state()?.watchers.push(Watcher {
            owner: self.id,
            range: KeyRange::new(key, options.prefix),
            prev_kv: options.prev_kv,
            tx,
        });
        Ok(Feed::new(rx))
    }

    async fn grant(&self, ttl: i64) -> Result<LeaseGrant> {
        if ttl <= 0 {
            return Err(Error::Request(format!(
                "lease TTL must be positive, got {}",
                ttl
            )));
        }
        if ttl > MAX_LEASE_TTL {
            return Err(Error::Request(format!(
                "lease TTL {} exceeds the maximum of {}",
                ttl, MAX_LEASE_TTL
            )));
        }
        let mut state = self.state()?;
        let id = LeaseId::new(state.next_lease);
        state.next_lease += 1;
        state.leases.insert(
            id,
            LeaseEntry {
                ttl,
                deadline: Instant::now() + Duration::from_secs(ttl as u64),
                keys: BTreeSet::new(),
            },
        );
        Ok(LeaseGrant { id, ttl })
    }

    async fn keep_alive(&self, id: LeaseId) -> Result<KeepAlive> {
        if !self.state()?.leases.contains_key(&id) {
            return Err(Error::LeaseNotFound(id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut shutdown = self.shutdown.subscribe();
        let cluster = self.cluster.clone();

        tokio::spawn(async move {
            loop {
                let Some(ttl) = cluster.renew(id) else {
                    tracing::warn!("Lease {} expired, keep-alive stopped", id);
                    break;
                };
                if tx.send(Ok(KeepAliveAck { id, ttl })).is_err() {
                    break;
                }
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(renewal_interval(ttl)) => {}
                }
            }
            tracing::debug!("Keep-alive for lease {} stopped", id);
        });

        Ok(Feed::new(rx))
    }

    async fn revoke(&self, id: LeaseId) -> Result<()> {
        self.state()?.revoke(id)?;
        Ok(())
    }

    async fn time_to_live(&self, id: LeaseId) -> Result<Option<i64>> {
        let state = self.state()?;
        Ok(state.leases.get(&id).map(|entry| {
            let remaining = entry.deadline.saturating_duration_since(Instant::now());
            remaining.as_millis().div_ceil(1000) as i64
        }))
    }

    fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let mut state = self.cluster.inner.lock();
        state.watchers.retain(|w| w.owner != self.id);
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
