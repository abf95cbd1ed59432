//! Watch events and key ranges

use crate::client::{Feed, KeyValue};
use crate::common::prefix_range_end;
use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Put => write!(f, "PUT"),
            EventKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A single change to a watched key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    /// The record after the change. For deletes only the key and
    /// `mod_revision` are meaningful.
    pub kv: KeyValue,
    /// The record before the change, when the watch asked for it
    pub prev_kv: Option<KeyValue>,
}

impl std::fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} : {:?}",
            self.kind,
            self.kv.key_str(),
            self.kv.value_str()
        )?;
        if let Some(prev) = &self.prev_kv {
            write!(f, " (prev {:?})", prev.value_str())?;
        }
        Ok(())
    }
}

/// Events applied by the service at one revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchBatch {
    pub revision: i64,
    pub events: Vec<WatchEvent>,
}

/// Live change notifications for a key or key range
pub type Subscription = Feed<crate::Result<WatchBatch>>;

/// Keys selected by a get/delete/watch request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRange {
    Exact(Bytes),
    Prefix(Bytes),
}

impl KeyRange {
    pub fn new(key: Bytes, prefix: bool) -> Self {
        if prefix {
            KeyRange::Prefix(key)
        } else {
            KeyRange::Exact(key)
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        match self {
            KeyRange::Exact(k) => k.as_ref() == key,
            KeyRange::Prefix(p) => key.starts_with(p),
        }
    }

    pub fn start(&self) -> &[u8] {
        match self {
            KeyRange::Exact(k) | KeyRange::Prefix(k) => k,
        }
    }

    /// Exclusive end of the range; `None` means unbounded
    pub fn end(&self) -> Option<Vec<u8>> {
        match self {
            KeyRange::Exact(k) => {
                let mut end = k.to_vec();
                end.push(0);
                Some(end)
            }
            KeyRange::Prefix(p) => prefix_range_end(p),
        }
    }
}
