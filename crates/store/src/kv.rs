//! The key-value store seam.
//!
//! The engine needs very little from its backing store: point reads, one
//! batched multi-get (a single pipelined round-trip, however many keys),
//! hash reads, and an atomic write batch. Anything Redis-shaped satisfies
//! this trait; [`crate::MemoryStore`] is the in-tree implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

/// Errors surfaced by a backing store.
///
/// Callers decide whether a failure is fatal: sampling-rate lookups degrade
/// to "no cached value", detector state reads and commits propagate so the
/// evaluation cycle can be retried.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A single buffered write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        key: String,
        value: String,
    },
    Delete {
        key: String,
    },
    HashSet {
        key: String,
        field: String,
        value: String,
    },
    HashDelete {
        key: String,
        field: String,
    },
    /// Set (or refresh) a time-to-live on a key.
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// An ordered batch of writes applied atomically by [`KeyValueStore::apply`].
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.ops.push(WriteOp::Set {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    pub fn hash_set(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.ops.push(WriteOp::HashSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
    }

    pub fn hash_delete(&mut self, key: impl Into<String>, field: impl Into<String>) {
        self.ops.push(WriteOp::HashDelete {
            key: key.into(),
            field: field.into(),
        });
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) {
        self.ops.push(WriteOp::Expire {
            key: key.into(),
            ttl,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// Shared key-value store abstraction.
///
/// Implementations must make [`multi_get`](KeyValueStore::multi_get) a
/// single round-trip regardless of key count, and
/// [`apply`](KeyValueStore::apply) all-or-nothing for one batch.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a single scalar key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Read many scalar keys in ONE pipelined round-trip.
    ///
    /// The result has the same length and order as `keys`; missing keys
    /// yield `None`.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Read a single field of a hash key.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Read all fields of a hash key. A missing key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Apply a write batch atomically.
    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
