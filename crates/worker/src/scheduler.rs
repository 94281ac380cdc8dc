//! Periodic sampling scheduler.
//!
//! Drives the three sampling tasks (project boost, sliding window,
//! recalibration) on a fixed tick for every org the feed knows about. The
//! metrics layer is behind the [`VolumeFeed`] trait; a feed failure skips
//! the org for this tick and the next tick tries again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sieve_core::{OrgId, ProjectId};
use sieve_sampling::tasks::{run_project_boost, run_recalibration, run_sliding_window};
use sieve_sampling::{QuotaService, RecalibrationController};
use sieve_store::{ProjectBoostStore, SlidingWindowStore};
use tokio_util::sync::CancellationToken;

/// Observation window the sliding-window rates are computed over.
pub const WINDOW_HOURS: u64 = 24;

/// External metrics layer: per-org volumes and sampling outcome counts.
#[async_trait]
pub trait VolumeFeed: Send + Sync {
    /// Orgs to schedule this tick.
    async fn org_ids(&self) -> anyhow::Result<Vec<OrgId>>;

    /// Total per-project volume used for budget redistribution.
    async fn project_volumes(&self, org_id: OrgId) -> anyhow::Result<HashMap<ProjectId, u64>>;

    /// Per-project volume observed inside the sliding window.
    async fn window_volumes(&self, org_id: OrgId) -> anyhow::Result<HashMap<ProjectId, u64>>;

    /// `(keep, drop)` outcome counts since the last run.
    async fn outcome_counts(&self, org_id: OrgId) -> anyhow::Result<(u64, u64)>;
}

/// Feed that reports no orgs; used until the platform wires a real one.
pub struct NullVolumeFeed;

#[async_trait]
impl VolumeFeed for NullVolumeFeed {
    async fn org_ids(&self) -> anyhow::Result<Vec<OrgId>> {
        Ok(Vec::new())
    }

    async fn project_volumes(&self, _org_id: OrgId) -> anyhow::Result<HashMap<ProjectId, u64>> {
        Ok(HashMap::new())
    }

    async fn window_volumes(&self, _org_id: OrgId) -> anyhow::Result<HashMap<ProjectId, u64>> {
        Ok(HashMap::new())
    }

    async fn outcome_counts(&self, _org_id: OrgId) -> anyhow::Result<(u64, u64)> {
        Ok((0, 0))
    }
}

/// Runs the sampling tasks on a fixed interval until cancelled.
pub struct SamplingScheduler {
    feed: Arc<dyn VolumeFeed>,
    quotas: Arc<dyn QuotaService>,
    boost: ProjectBoostStore,
    sliding_window: Arc<SlidingWindowStore>,
    recalibration: RecalibrationController,
    interval: Duration,
    cancel: CancellationToken,
}

impl SamplingScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: Arc<dyn VolumeFeed>,
        quotas: Arc<dyn QuotaService>,
        boost: ProjectBoostStore,
        sliding_window: Arc<SlidingWindowStore>,
        recalibration: RecalibrationController,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            feed,
            quotas,
            boost,
            sliding_window,
            recalibration,
            interval,
            cancel,
        }
    }

    /// Tick until the cancellation token fires.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("sampling scheduler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass over every org the feed reports.
    ///
    /// Failures are logged per org and do not stop the tick: the next run
    /// recomputes from scratch anyway.
    pub async fn tick(&self) {
        let org_ids = match self.feed.org_ids().await {
            Ok(org_ids) => org_ids,
            Err(err) => {
                tracing::warn!(%err, "volume feed unavailable; skipping tick");
                return;
            }
        };

        for org_id in org_ids {
            if let Err(err) = self.run_org(org_id).await {
                tracing::warn!(org_id, %err, "sampling tasks failed for org; will retry next tick");
            }
        }
    }

    async fn run_org(&self, org_id: OrgId) -> anyhow::Result<()> {
        let volumes = self.feed.project_volumes(org_id).await?;
        run_project_boost(org_id, &volumes, self.quotas.as_ref(), &self.boost).await?;

        let window_volumes = self.feed.window_volumes(org_id).await?;
        run_sliding_window(
            org_id,
            &window_volumes,
            WINDOW_HOURS,
            self.quotas.as_ref(),
            &self.sliding_window,
        )
        .await?;

        let (keep, drop) = self.feed.outcome_counts(org_id).await?;
        run_recalibration(org_id, keep, drop, self.quotas.as_ref(), &self.recalibration).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_events::ControlBus;
    use sieve_sampling::StaticTierTable;
    use sieve_store::{MemoryStore, RecalibrationStore};

    struct StaticFeed {
        volumes: HashMap<ProjectId, u64>,
        outcomes: (u64, u64),
    }

    #[async_trait]
    impl VolumeFeed for StaticFeed {
        async fn org_ids(&self) -> anyhow::Result<Vec<OrgId>> {
            Ok(vec![1])
        }

        async fn project_volumes(
            &self,
            _org_id: OrgId,
        ) -> anyhow::Result<HashMap<ProjectId, u64>> {
            Ok(self.volumes.clone())
        }

        async fn window_volumes(
            &self,
            _org_id: OrgId,
        ) -> anyhow::Result<HashMap<ProjectId, u64>> {
            Ok(self.volumes.clone())
        }

        async fn outcome_counts(&self, _org_id: OrgId) -> anyhow::Result<(u64, u64)> {
            Ok(self.outcomes)
        }
    }

    #[tokio::test]
    async fn one_tick_populates_every_sampling_store() {
        let kv = Arc::new(MemoryStore::new());
        let bus = Arc::new(ControlBus::default());
        let quotas = Arc::new(StaticTierTable::from_shorthand(0.25, &[("100k", 1.0)]).unwrap());

        let feed = Arc::new(StaticFeed {
            volumes: HashMap::from([(10, 9), (11, 1)]),
            // 10% keep ratio against the 25% blended target.
            outcomes: (100, 900),
        });

        let scheduler = SamplingScheduler::new(
            feed,
            quotas,
            ProjectBoostStore::new(kv.clone()),
            Arc::new(SlidingWindowStore::new(kv.clone(), bus)),
            RecalibrationController::new(RecalibrationStore::new(kv.clone())),
            Duration::from_secs(3600),
            CancellationToken::new(),
        );
        scheduler.tick().await;

        let boost = ProjectBoostStore::new(kv.clone());
        assert!(boost.get(1, 10).await.is_some());
        assert_eq!(boost.get(1, 11).await, Some(1.0));

        let factor = RecalibrationStore::new(kv).get_factor(1).await.unwrap();
        assert!((factor.unwrap() - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancelled_scheduler_stops_running() {
        let kv = Arc::new(MemoryStore::new());
        let bus = Arc::new(ControlBus::default());
        let cancel = CancellationToken::new();

        let scheduler = SamplingScheduler::new(
            Arc::new(NullVolumeFeed),
            Arc::new(StaticTierTable::new(0.25, Vec::new())),
            ProjectBoostStore::new(kv.clone()),
            Arc::new(SlidingWindowStore::new(kv.clone(), bus)),
            RecalibrationController::new(RecalibrationStore::new(kv)),
            Duration::from_millis(10),
            cancel.clone(),
        );

        let handle = tokio::spawn(scheduler.run());
        cancel.cancel();
        handle.await.expect("scheduler task should exit cleanly");
    }
}
