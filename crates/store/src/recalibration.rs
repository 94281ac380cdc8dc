//! Persisted per-org recalibration factor.
//!
//! An absent entry means factor 1.0 (no adjustment); the controller in
//! `sieve-sampling` owns the math, this store only persists the scalar.

use std::sync::Arc;

use sieve_core::OrgId;

use crate::kv::{KeyValueStore, StoreError, WriteBatch};

fn org_key(org_id: OrgId) -> String {
    format!("sampling:{org_id}:recalibrate")
}

/// Scalar store for the multiplicative adjustment factor.
pub struct RecalibrationStore {
    store: Arc<dyn KeyValueStore>,
}

impl RecalibrationStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored factor for an org, `None` when unset.
    ///
    /// Errors propagate: the recalibration write path must not mistake an
    /// outage for "factor is 1.0" and compound against the wrong base.
    pub async fn get_factor(&self, org_id: OrgId) -> Result<Option<f64>, StoreError> {
        let raw = self.store.get(&org_key(org_id)).await?;
        Ok(raw.and_then(|s| s.parse::<f64>().ok()))
    }

    pub async fn set_factor(&self, org_id: OrgId, factor: f64) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.set(org_key(org_id), factor.to_string());
        self.store.apply(batch).await
    }

    pub async fn clear_factor(&self, org_id: OrgId) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch.delete(org_key(org_id));
        self.store.apply(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn absent_factor_reads_as_none() {
        let store = RecalibrationStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(store.get_factor(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_get_clear_round_trips() {
        let store = RecalibrationStore::new(Arc::new(MemoryStore::new()));
        store.set_factor(1, 2.0).await.unwrap();
        assert_eq!(store.get_factor(1).await.unwrap(), Some(2.0));

        store.clear_factor(1).await.unwrap();
        assert_eq!(store.get_factor(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn outage_propagates_instead_of_reading_as_unset() {
        let kv = Arc::new(MemoryStore::new());
        let store = RecalibrationStore::new(kv.clone());
        kv.set_unavailable(true);

        assert_matches!(store.get_factor(1).await, Err(StoreError::Unavailable(_)));
    }
}
