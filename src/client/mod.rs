//! Client facade over the coordination service
//!
//! - [`Session`]: the facade; every unary call is bounded by a timeout
//! - [`KvBackend`]: the seam between the facade and a service
//! - [`EtcdBackend`]: etcd v3 over gRPC
//! - [`MemoryCluster`]: in-process service with the same semantics

pub mod etcd;
pub mod feed;
pub mod lease;
pub mod memory;
pub mod session;
pub mod types;
pub mod watch;

pub use etcd::EtcdBackend;
pub use feed::{CancelHandle, Feed};
pub use lease::{
    renewal_interval, KeepAlive, KeepAliveAck, LeaseGrant, LeaseId, MAX_LEASE_TTL,
};
pub use memory::{MemoryBackend, MemoryCluster};
pub use session::Session;
pub use types::{
    DeleteOptions, DeleteResponse, GetOptions, GetResponse, KeyValue, PutOptions, PutResponse,
    WatchOptions,
};
pub use watch::{EventKind, KeyRange, Subscription, WatchBatch, WatchEvent};

use crate::common::Result;
use bytes::Bytes;

/// Operations a coordination service must provide.
///
/// Streaming calls return a [`Feed`]; the backend keeps producing until the
/// feed is cancelled or dropped, or until [`KvBackend::shutdown`] runs.
#[tonic::async_trait]
pub trait KvBackend: Send + Sync + 'static {
    async fn put(&self, key: Bytes, value: Bytes, options: PutOptions) -> Result<PutResponse>;

    async fn get(&self, key: Bytes, options: GetOptions) -> Result<GetResponse>;

    async fn delete(&self, key: Bytes, options: DeleteOptions) -> Result<DeleteResponse>;

    async fn watch(&self, key: Bytes, options: WatchOptions) -> Result<Subscription>;

    async fn grant(&self, ttl: i64) -> Result<LeaseGrant>;

    async fn keep_alive(&self, id: LeaseId) -> Result<KeepAlive>;

    async fn revoke(&self, id: LeaseId) -> Result<()>;

    /// Remaining TTL in seconds, `None` once the lease is gone
    async fn time_to_live(&self, id: LeaseId) -> Result<Option<i64>>;

    /// End every feed opened through this backend. Idempotent.
    fn shutdown(&self);
}
