//! Configuration for coordkv
//!
//! Layers, lowest priority first: built-in defaults, an optional TOML file,
//! then `COORDKV__*` environment variables (`COORDKV__CLIENT__ENDPOINTS=a,b`).
//! The binary applies its CLI flags on top.

use crate::common::utils::duration_str;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "COORDKV";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster connection settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Keys and timings used by the tour
    #[serde(default)]
    pub tour: TourConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            tour: TourConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("client.endpoints"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.client.validate()?;
        self.tour.validate()
    }
}

/// Cluster connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service endpoints, tried in order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Time allowed to reach any endpoint
    #[serde(default = "default_timeout", with = "duration_str")]
    pub dial_timeout: Duration,

    /// Upper bound for each unary request
    #[serde(default = "default_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

fn default_endpoints() -> Vec<String> {
    vec![
        "localhost:2379".to_string(),
        "localhost:22379".to_string(),
        "localhost:32379".to_string(),
    ]
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            dial_timeout: default_timeout(),
            request_timeout: default_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.endpoints.iter().all(|e| e.trim().is_empty()) {
            return Err(crate::Error::InvalidConfig(
                "at least one endpoint is required".into(),
            ));
        }
        if self.dial_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(crate::Error::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// A record written by the tour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourRecord {
    pub key: String,
    pub value: String,
}

impl TourRecord {
    fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Keys and timings used by the tour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourConfig {
    /// Prefix shared by `records`; read and deleted as a range
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Records written under the namespace. The first one is read, watched
    /// and deleted by exact key.
    #[serde(default = "default_records")]
    pub records: Vec<TourRecord>,

    /// Key bound to the lease
    #[serde(default = "default_lease_key")]
    pub lease_key: String,

    #[serde(default = "default_lease_value")]
    pub lease_value: String,

    /// Lease TTL in seconds
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl: i64,

    /// Pause between stopping keep-alive and revoking the lease
    #[serde(default = "default_revoke_delay", with = "duration_str")]
    pub revoke_delay: Duration,

    /// Grace period for in-flight watch events before the watches are cancelled
    #[serde(default = "default_watch_settle", with = "duration_str")]
    pub watch_settle: Duration,

    /// Extra time spent watching after the sequence finishes
    #[serde(default, with = "duration_str")]
    pub linger: Duration,
}

fn default_namespace() -> String {
    "/tizi365/".to_string()
}
fn default_records() -> Vec<TourRecord> {
    vec![
        TourRecord::new("/tizi365/url", "www.tizi365.com"),
        TourRecord::new("/tizi365/name", "tizi365"),
    ]
}
fn default_lease_key() -> String {
    "/job/v3/1".to_string()
}
fn default_lease_value() -> String {
    "koock".to_string()
}
fn default_lease_ttl() -> i64 {
    10
}
fn default_revoke_delay() -> Duration {
    Duration::from_secs(2)
}
fn default_watch_settle() -> Duration {
    Duration::from_millis(500)
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            records: default_records(),
            lease_key: default_lease_key(),
            lease_value: default_lease_value(),
            lease_ttl: default_lease_ttl(),
            revoke_delay: default_revoke_delay(),
            watch_settle: default_watch_settle(),
            linger: Duration::ZERO,
        }
    }
}

impl TourConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.namespace.is_empty() {
            return Err(crate::Error::InvalidConfig("tour namespace is empty".into()));
        }
        if self.records.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "tour needs at least one record".into(),
            ));
        }
        if let Some(stray) = self
            .records
            .iter()
            .find(|r| !r.key.starts_with(&self.namespace))
        {
            return Err(crate::Error::InvalidConfig(format!(
                "record {} is outside namespace {}",
                stray.key, self.namespace
            )));
        }
        if self.lease_key.starts_with(&self.namespace) {
            return Err(crate::Error::InvalidConfig(
                "lease key must live outside the tour namespace".into(),
            ));
        }
        if self.lease_ttl <= 0 {
            return Err(crate::Error::InvalidConfig(
                "lease ttl must be positive".into(),
            ));
        }
        Ok(())
    }
}
