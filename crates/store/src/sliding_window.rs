//! Cached per-project sliding-window sample rates.
//!
//! Rates are computed by a periodic task and cached here per
//! `(org_id, project_id)`. Writing a rate that differs from the cached one
//! publishes a `sampling.config_invalidated` event so the ingestion layer
//! re-fetches project configuration; writing an identical rate does not.
//! That equality check is what keeps a steady-state fleet from generating
//! an invalidation storm on every scheduled run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sieve_core::{OrgId, ProjectId};
use sieve_events::{ControlBus, ControlEvent};

use crate::kv::{KeyValueStore, StoreError, WriteBatch};

/// How long a cached rate stays live without being rewritten.
///
/// A project that stops reporting metrics stops having its rate refreshed;
/// the TTL guarantees the stale value eventually disappears even if the
/// explicit `clear` was missed.
pub const SLIDING_WINDOW_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Event type published when a cached rate changes or is cleared.
pub const CONFIG_INVALIDATED: &str = "sampling.config_invalidated";

fn org_key(org_id: OrgId) -> String {
    format!("sampling:{org_id}:sliding_window")
}

/// Keyed cache of per-project sliding-window sample rates.
pub struct SlidingWindowStore {
    store: Arc<dyn KeyValueStore>,
    bus: Arc<ControlBus>,
    ttl: Duration,
}

impl SlidingWindowStore {
    pub fn new(store: Arc<dyn KeyValueStore>, bus: Arc<ControlBus>) -> Self {
        Self::with_ttl(store, bus, SLIDING_WINDOW_TTL)
    }

    /// Cache with a non-default TTL; tests use short ones.
    pub fn with_ttl(store: Arc<dyn KeyValueStore>, bus: Arc<ControlBus>, ttl: Duration) -> Self {
        Self { store, bus, ttl }
    }

    /// Cached rate for a project, or `None` when absent.
    ///
    /// Store failures degrade to `None` with a warning; a transient outage
    /// must never take down a caller that has a blended rate to fall back
    /// on.
    pub async fn get(&self, org_id: OrgId, project_id: ProjectId) -> Option<f64> {
        let raw = match self
            .store
            .hash_get(&org_key(org_id), &project_id.to_string())
            .await
        {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(org_id, project_id, %err, "sliding window read failed; treating as uncached");
                return None;
            }
        };
        match raw.parse::<f64>() {
            Ok(rate) => Some(rate),
            Err(_) => {
                tracing::warn!(org_id, project_id, raw, "unparseable cached rate; treating as uncached");
                None
            }
        }
    }

    /// All cached rates for an org (project id → rate).
    ///
    /// Degrades to an empty map on store failure, so callers that clear
    /// stale entries based on this view clear nothing rather than
    /// everything.
    pub async fn project_rates(&self, org_id: OrgId) -> HashMap<ProjectId, f64> {
        let fields = match self.store.hash_get_all(&org_key(org_id)).await {
            Ok(fields) => fields,
            Err(err) => {
                tracing::warn!(org_id, %err, "sliding window scan failed; treating as empty");
                return HashMap::new();
            }
        };
        fields
            .into_iter()
            .filter_map(|(project, raw)| {
                Some((project.parse::<ProjectId>().ok()?, raw.parse::<f64>().ok()?))
            })
            .collect()
    }

    /// Overwrite the cached rate for a project.
    ///
    /// Publishes a config-invalidation event iff the value actually
    /// changed. The TTL on the org hash is refreshed either way.
    pub async fn set(
        &self,
        org_id: OrgId,
        project_id: ProjectId,
        rate: f64,
    ) -> Result<(), StoreError> {
        let key = org_key(org_id);
        let previous = self.get(org_id, project_id).await;

        let mut batch = WriteBatch::new();
        batch.hash_set(&key, project_id.to_string(), rate.to_string());
        batch.expire(&key, self.ttl);
        self.store.apply(batch).await?;

        if previous != Some(rate) {
            self.invalidate(org_id, project_id, "rate_changed");
        }
        Ok(())
    }

    /// Drop the cached rate for a project that stopped reporting metrics.
    ///
    /// Clearing an existing entry triggers invalidation exactly like `set`;
    /// clearing an absent entry is a no-op.
    pub async fn clear(&self, org_id: OrgId, project_id: ProjectId) -> Result<(), StoreError> {
        let previous = self.get(org_id, project_id).await;
        if previous.is_none() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        batch.hash_delete(org_key(org_id), project_id.to_string());
        self.store.apply(batch).await?;

        self.invalidate(org_id, project_id, "rate_cleared");
        Ok(())
    }

    fn invalidate(&self, org_id: OrgId, project_id: ProjectId, reason: &str) {
        tracing::debug!(org_id, project_id, reason, "invalidating distributed sampling config");
        self.bus.publish(
            ControlEvent::new(CONFIG_INVALIDATED)
                .with_org(org_id)
                .with_project(project_id)
                .with_payload(serde_json::json!({ "reason": reason })),
        );
    }
}
