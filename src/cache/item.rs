//! Cache Item Module
//!
//! Defines the record stored for every key, carrying its serial id, deadline and size.

use chrono::{DateTime, TimeZone, Utc};

use crate::cache::clock::now_nanos;

// == Item ==
/// A single cache entry.
///
/// Only `expiration` changes after construction (prolongation moves it
/// forward); every other field is fixed by the write that created the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item<K, V> {
    pub(crate) id: u64,
    pub(crate) key: K,
    pub(crate) value: V,
    /// Absolute deadline (Unix nanoseconds)
    pub(crate) expiration: i64,
    /// Computed by the size policy, zero otherwise
    pub(crate) size: u64,
}

impl<K, V> Item<K, V> {
    // == Constructor ==
    pub(crate) fn new(id: u64, key: K, value: V, expiration: i64) -> Self {
        Self {
            id,
            key,
            value,
            expiration,
            size: 0,
        }
    }

    /// Serial id assigned when the item was written.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the item, returning the stored value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// Deadline as Unix nanoseconds.
    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    /// Deadline as a UTC timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.expiration)
    }

    /// Size reported by the sizing function, or zero when no size policy is active.
    pub fn size(&self) -> u64 {
        self.size
    }

    // == Is Expired ==
    /// Checks whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.expired_at(now_nanos())
    }

    /// An item is still live at exactly its deadline.
    pub(crate) fn expired_at(&self, now: i64) -> bool {
        now > self.expiration
    }
}
