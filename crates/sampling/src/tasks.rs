//! Periodic task entry points.
//!
//! The worker (or any external scheduler) calls these once per tick with
//! the volume maps it fetched from the metrics layer. The tasks own the
//! glue between the pure math in [`crate::engine`] and the state stores.

use std::collections::HashMap;

use sieve_core::{OrgId, ProjectId};
use sieve_store::{ProjectBoostStore, SlidingWindowStore, StoreError};

use crate::engine::{compute_project_boost, compute_sliding_window_rate};
use crate::quotas::QuotaService;
use crate::recalibrate::RecalibrationController;

/// Recompute and persist boosted per-project rates for one org.
///
/// The retained-event budget is the org's blended rate applied to its
/// total observed volume.
pub async fn run_project_boost(
    org_id: OrgId,
    volumes: &HashMap<ProjectId, u64>,
    quotas: &dyn QuotaService,
    boost_store: &ProjectBoostStore,
) -> Result<HashMap<ProjectId, f64>, StoreError> {
    let blended = quotas.blended_sample_rate(org_id);
    let total_volume: u64 = volumes.values().sum();
    let budget = blended * total_volume as f64;

    let rates = compute_project_boost(volumes, budget);
    boost_store.set_rates(org_id, &rates).await?;

    tracing::info!(
        org_id,
        projects = rates.len(),
        total_volume,
        budget,
        "project boost rates recomputed"
    );
    Ok(rates)
}

/// Recompute and persist sliding-window rates for one org.
///
/// Projects present in `window_volumes` get a fresh rate; cached projects
/// that stopped reporting are cleared so stale rates are never served as
/// real data.
pub async fn run_sliding_window(
    org_id: OrgId,
    window_volumes: &HashMap<ProjectId, u64>,
    window_hours: u64,
    quotas: &dyn QuotaService,
    sliding_window: &SlidingWindowStore,
) -> Result<(), StoreError> {
    let blended = quotas.blended_sample_rate(org_id);

    for (&project_id, &volume) in window_volumes {
        let rate = compute_sliding_window_rate(org_id, volume, window_hours, blended, quotas);
        sliding_window.set(org_id, project_id, rate).await?;
    }

    let cached = sliding_window.project_rates(org_id).await;
    for project_id in cached.keys() {
        if !window_volumes.contains_key(project_id) {
            sliding_window.clear(org_id, *project_id).await?;
        }
    }

    tracing::info!(
        org_id,
        projects = window_volumes.len(),
        window_hours,
        "sliding window rates recomputed"
    );
    Ok(())
}

/// Run one recalibration step for one org against its blended target.
pub async fn run_recalibration(
    org_id: OrgId,
    keep_count: u64,
    drop_count: u64,
    quotas: &dyn QuotaService,
    controller: &RecalibrationController,
) -> Result<Option<f64>, StoreError> {
    let target = quotas.blended_sample_rate(org_id);
    controller.recalibrate(org_id, target, keep_count, drop_count).await
}
