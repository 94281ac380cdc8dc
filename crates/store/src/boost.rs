//! Cached per-project boosted sample rates.
//!
//! The low-volume-project boost task writes its whole per-org result map
//! here in one atomic batch; the rule generator reads individual projects
//! back when assembling rules.

use std::collections::HashMap;
use std::sync::Arc;

use sieve_core::{OrgId, ProjectId};

use crate::kv::{KeyValueStore, StoreError, WriteBatch};

fn org_key(org_id: OrgId) -> String {
    format!("sampling:{org_id}:boost_low_volume_projects")
}

/// Keyed cache of per-project boosted sample rates.
pub struct ProjectBoostStore {
    store: Arc<dyn KeyValueStore>,
}

impl ProjectBoostStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Boosted rate for a project, or `None` when absent.
    ///
    /// Store failures degrade to `None` with a warning.
    pub async fn get(&self, org_id: OrgId, project_id: ProjectId) -> Option<f64> {
        let raw = match self
            .store
            .hash_get(&org_key(org_id), &project_id.to_string())
            .await
        {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(org_id, project_id, %err, "boost rate read failed; treating as uncached");
                return None;
            }
        };
        raw.parse::<f64>().ok()
    }

    /// Replace the whole boost map for an org.
    ///
    /// Projects absent from `rates` are removed so that a project that
    /// stopped reporting does not keep serving an old boost.
    pub async fn set_rates(
        &self,
        org_id: OrgId,
        rates: &HashMap<ProjectId, f64>,
    ) -> Result<(), StoreError> {
        let key = org_key(org_id);
        let existing = self.store.hash_get_all(&key).await?;

        let mut batch = WriteBatch::new();
        for field in existing.keys() {
            if field
                .parse::<ProjectId>()
                .map(|id| !rates.contains_key(&id))
                .unwrap_or(true)
            {
                batch.hash_delete(&key, field.clone());
            }
        }
        for (project_id, rate) in rates {
            batch.hash_set(&key, project_id.to_string(), rate.to_string());
        }
        self.store.apply(batch).await
    }
}
