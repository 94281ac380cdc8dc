//! In-memory [`KeyValueStore`] implementation.
//!
//! Backs the worker binary in single-process deployments and every test in
//! the workspace. Write batches are applied under one write lock, so a
//! batch is observed all-or-nothing. The store counts multi-get
//! round-trips and the keys fetched per round-trip; tests assert the
//! batched-read property against these counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::kv::{KeyValueStore, StoreError, WriteBatch, WriteOp};

#[derive(Debug, Default)]
struct Inner {
    scalars: HashMap<String, Entry<String>>,
    hashes: HashMap<String, Entry<HashMap<String, String>>>,
}

#[derive(Debug)]
struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn live(&self) -> Option<&T> {
        match self.expires_at {
            Some(deadline) if Instant::now() >= deadline => None,
            _ => Some(&self.value),
        }
    }
}

/// In-memory store with instrumentation counters.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    multi_get_rounds: AtomicUsize,
    multi_get_keys: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `multi_get` round-trips issued so far.
    pub fn multi_get_rounds(&self) -> usize {
        self.multi_get_rounds.load(Ordering::SeqCst)
    }

    /// Total number of keys fetched across all `multi_get` round-trips.
    pub fn multi_get_keys_fetched(&self) -> usize {
        self.multi_get_keys.load(Ordering::SeqCst)
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    ///
    /// Used by tests to exercise degraded-read and retryable-commit paths.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner.scalars.get(key).and_then(Entry::live).cloned())
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        self.check_available()?;
        self.multi_get_rounds.fetch_add(1, Ordering::SeqCst);
        self.multi_get_keys.fetch_add(keys.len(), Ordering::SeqCst);

        let inner = self.inner.read().await;
        Ok(keys
            .iter()
            .map(|key| inner.scalars.get(key).and_then(Entry::live).cloned())
            .collect())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .hashes
            .get(key)
            .and_then(Entry::live)
            .and_then(|fields| fields.get(field).cloned()))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check_available()?;
        let inner = self.inner.read().await;
        Ok(inner
            .hashes
            .get(key)
            .and_then(Entry::live)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.check_available()?;
        // One write lock for the whole batch: readers observe it atomically.
        let mut inner = self.inner.write().await;
        for op in batch.ops() {
            match op {
                WriteOp::Set { key, value } => {
                    inner.scalars.insert(
                        key.clone(),
                        Entry {
                            value: value.clone(),
                            expires_at: None,
                        },
                    );
                }
                WriteOp::Delete { key } => {
                    inner.scalars.remove(key);
                }
                WriteOp::HashSet { key, field, value } => {
                    let entry = inner.hashes.entry(key.clone()).or_insert_with(|| Entry {
                        value: HashMap::new(),
                        expires_at: None,
                    });
                    entry.value.insert(field.clone(), value.clone());
                }
                WriteOp::HashDelete { key, field } => {
                    if let Some(entry) = inner.hashes.get_mut(key) {
                        entry.value.remove(field);
                        if entry.value.is_empty() {
                            inner.hashes.remove(key);
                        }
                    }
                }
                WriteOp::Expire { key, ttl } => {
                    let deadline = Some(Instant::now() + *ttl);
                    if let Some(entry) = inner.scalars.get_mut(key) {
                        entry.expires_at = deadline;
                    }
                    if let Some(entry) = inner.hashes.get_mut(key) {
                        entry.expires_at = deadline;
                    }
                }
            }
        }
        Ok(())
    }
}
