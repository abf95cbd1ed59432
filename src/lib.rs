//! # coordkv
//!
//! A small client facade over an etcd-style coordination service:
//! - Put / get / delete, by exact key or by prefix
//! - Watches with optional previous values
//! - Leases with keep-alive and cascading revocation
//! - Per-request timeouts and explicit `Result` errors (no retries)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Session<B>                               │
//! │  put / get / delete / grant / revoke     │──── bounded by request timeout
//! │  watch ──────► Subscription (Feed)       │
//! │  keep_alive ─► KeepAlive (Feed)          │──── cancellable, ends on close
//! └───────────────┬──────────────────────────┘
//!                 │ KvBackend
//!      ┌──────────┴───────────┐
//!      │                      │
//! ┌────▼────────┐      ┌──────▼─────────┐
//! │ EtcdBackend │      │ MemoryBackend  │
//! │ (gRPC)      │      │ (in-process)   │
//! └─────────────┘      └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Walk through every operation against a local cluster
//! coordkv --endpoints localhost:2379 tour
//!
//! # Same, without a cluster
//! coordkv --in-memory tour
//!
//! # Single operations
//! coordkv put /tizi365/url www.tizi365.com
//! coordkv get /tizi365/ --prefix
//! coordkv watch /tizi365/ --prefix --prev-kv
//! coordkv grant 10
//! coordkv keep-alive 694d7a5b8c3e0012 --for 30s
//! ```

pub mod client;
pub mod common;
pub mod tour;

// Re-export commonly used types
pub use client::{KvBackend, MemoryCluster, Session};
pub use common::{Config, Error, Result};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
