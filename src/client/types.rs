//! Records, request options and responses shared by every backend

use crate::client::LeaseId;
use crate::common::display_bytes;
use bytes::Bytes;

/// A key-value record as stored by the service
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
    /// Revision of the last creation of this key
    pub create_revision: i64,
    /// Revision of the last modification of this key
    pub mod_revision: i64,
    /// Number of writes since creation; reset by deletion
    pub version: i64,
    /// Lease the key is bound to; 0 when unbound
    pub lease: i64,
}

impl KeyValue {
    pub fn key_str(&self) -> String {
        display_bytes(&self.key)
    }

    pub fn value_str(&self) -> String {
        display_bytes(&self.value)
    }

    pub fn lease_id(&self) -> Option<LeaseId> {
        (self.lease != 0).then(|| LeaseId::new(self.lease))
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} : {}", self.key_str(), self.value_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    pub lease: Option<LeaseId>,
    pub prev_kv: bool,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the record to `lease`
    pub fn with_lease(mut self, lease: LeaseId) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Return the record being overwritten
    pub fn with_prev_kv(mut self) -> Self {
        self.prev_kv = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    pub prefix: bool,
    /// Maximum number of records returned; 0 means no limit
    pub limit: i64,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self) -> Self {
        self.prefix = true;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub prefix: bool,
    pub prev_kv: bool,
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self) -> Self {
        self.prefix = true;
        self
    }

    /// Return the deleted records
    pub fn with_prev_kv(mut self) -> Self {
        self.prev_kv = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub prefix: bool,
    pub prev_kv: bool,
}

impl WatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self) -> Self {
        self.prefix = true;
        self
    }

    /// Attach the previous record to each event
    pub fn with_prev_kv(mut self) -> Self {
        self.prev_kv = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutResponse {
    pub revision: i64,
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone, Default)]
pub struct GetResponse {
    pub revision: i64,
    /// Matching records in key order
    pub kvs: Vec<KeyValue>,
    /// Number of matches, ignoring the limit
    pub count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteResponse {
    pub revision: i64,
    pub deleted: i64,
    pub prev_kvs: Vec<KeyValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_display() {
        let kv = KeyValue {
            key: Bytes::from_static(b"/tizi365/url"),
            value: Bytes::from_static(b"www.tizi365.com"),
            ..Default::default()
        };
        assert_eq!(kv.to_string(), "/tizi365/url : www.tizi365.com");
        assert_eq!(kv.lease_id(), None);

        let leased = KeyValue { lease: 42, ..kv };
        assert_eq!(leased.lease_id(), Some(LeaseId::new(42)));
    }

    #[test]
    fn test_option_builders() {
        let put = PutOptions::new().with_lease(LeaseId::new(9)).with_prev_kv();
        assert_eq!(put.lease, Some(LeaseId::new(9)));
        assert!(put.prev_kv);

        let get = GetOptions::new().with_prefix().with_limit(3);
        assert!(get.prefix);
        assert_eq!(get.limit, 3);

        assert!(!DeleteOptions::new().prefix);
        assert!(WatchOptions::new().with_prev_kv().prev_kv);
    }
}
