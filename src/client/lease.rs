//! Lease identifiers, grants and keep-alive acknowledgements

use crate::client::Feed;
use std::time::Duration;

/// Floor for the heartbeat period, whatever the TTL
pub const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(500);

/// Longest TTL etcd grants, in seconds
pub const MAX_LEASE_TTL: i64 = 9_000_000_000;

/// Service-assigned lease identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(i64);

impl LeaseId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    /// Parse the hex form printed by `Display` (an optional `0x` is accepted)
    pub fn parse(s: &str) -> crate::Result<Self> {
        let digits = s.trim().trim_start_matches("0x");
        u64::from_str_radix(digits, 16)
            .map(|id| Self(id as i64))
            .map_err(|_| crate::Error::InvalidConfig(format!("invalid lease id: {}", s)))
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::str::FromStr for LeaseId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    pub id: LeaseId,
    /// Granted TTL in seconds
    pub ttl: i64,
}

/// One successful lease renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveAck {
    pub id: LeaseId,
    /// TTL after renewal, in seconds
    pub ttl: i64,
}

/// Heartbeats for one lease; cancel (or drop) it to let the lease run out
pub type KeepAlive = Feed<crate::Result<KeepAliveAck>>;

/// Heartbeat period for a lease of `ttl` seconds: a third of the TTL.
pub fn renewal_interval(ttl: i64) -> Duration {
    let ttl = Duration::from_secs(ttl.max(0) as u64);
    (ttl / 3).max(MIN_RENEWAL_INTERVAL)
}
