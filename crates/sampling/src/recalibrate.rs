//! Keep-ratio recalibration.
//!
//! Dynamic sampling aims for a target fraction of retained events, but the
//! rules actually deployed drift from it (rule interplay, client-side
//! decisions, traffic mix). The controller measures the observed keep
//! ratio per org and persists a multiplicative correction factor that
//! compounds across runs until the observation converges on the target.

use sieve_core::OrgId;
use sieve_store::{RecalibrationStore, StoreError};

/// Observed-vs-target distance treated as "converged".
pub const RATE_TOLERANCE: f64 = 1e-6;

/// Factor clamp bounds.
///
/// The feedback loop compounds indefinitely; a wedged observation (e.g. a
/// stuck counter) would otherwise grow the factor without bound. The
/// bounds are wide enough that legitimate corrections never touch them.
pub const MIN_FACTOR: f64 = 0.01;
pub const MAX_FACTOR: f64 = 100.0;

/// Feedback controller converging the observed keep ratio toward a target.
pub struct RecalibrationController {
    store: RecalibrationStore,
}

impl RecalibrationController {
    pub fn new(store: RecalibrationStore) -> Self {
        Self { store }
    }

    /// Run one recalibration step for an org.
    ///
    /// Returns the factor now in effect: `Some(factor)` when a correction
    /// is stored, `None` when the org is on target (any prior factor is
    /// cleared) or when the observation carries no signal (counts sum to
    /// zero; the stored factor is left untouched).
    pub async fn recalibrate(
        &self,
        org_id: OrgId,
        target_rate: f64,
        keep_count: u64,
        drop_count: u64,
    ) -> Result<Option<f64>, StoreError> {
        if !(0.0..=1.0).contains(&target_rate) || target_rate == 0.0 {
            tracing::warn!(org_id, target_rate, "invalid recalibration target; skipping org");
            return Ok(None);
        }

        let total = keep_count + drop_count;
        if total == 0 {
            tracing::debug!(org_id, "no outcome volume observed; leaving factor untouched");
            return Ok(None);
        }
        let effective_rate = keep_count as f64 / total as f64;
        if effective_rate == 0.0 {
            tracing::warn!(org_id, "zero keep ratio observed; leaving factor untouched");
            return Ok(None);
        }

        if (effective_rate - target_rate).abs() <= RATE_TOLERANCE {
            // Converged: absence of a factor means 1.0.
            self.store.clear_factor(org_id).await?;
            tracing::debug!(org_id, effective_rate, "keep ratio on target; factor cleared");
            return Ok(None);
        }

        let old_factor = self.store.get_factor(org_id).await?.unwrap_or(1.0);
        let new_factor = (old_factor * target_rate / effective_rate).clamp(MIN_FACTOR, MAX_FACTOR);
        self.store.set_factor(org_id, new_factor).await?;
        tracing::info!(
            org_id,
            target_rate,
            effective_rate,
            old_factor,
            new_factor,
            "recalibration factor updated"
        );
        Ok(Some(new_factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_store::MemoryStore;
    use std::sync::Arc;

    fn controller(kv: Arc<MemoryStore>) -> RecalibrationController {
        RecalibrationController::new(RecalibrationStore::new(kv))
    }

    const EPS: f64 = 1e-9;

    #[tokio::test]
    async fn under_sampled_org_gets_a_boosting_factor() {
        let ctl = controller(Arc::new(MemoryStore::new()));
        // Target 20%, observed 10% -> factor 2.0.
        let factor = ctl.recalibrate(1, 0.20, 100, 900).await.unwrap();
        assert!((factor.unwrap() - 2.0).abs() < EPS);
    }

    #[tokio::test]
    async fn over_sampled_org_gets_a_damping_factor() {
        let ctl = controller(Arc::new(MemoryStore::new()));
        // Target 20%, observed 40% -> factor 0.5.
        let factor = ctl.recalibrate(1, 0.20, 400, 600).await.unwrap();
        assert!((factor.unwrap() - 0.5).abs() < EPS);
    }

    #[tokio::test]
    async fn on_target_org_stores_no_factor() {
        let kv = Arc::new(MemoryStore::new());
        let ctl = controller(kv.clone());
        let factor = ctl.recalibrate(1, 0.20, 200, 800).await.unwrap();
        assert_eq!(factor, None);

        let store = RecalibrationStore::new(kv);
        assert_eq!(store.get_factor(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn factors_compound_across_runs() {
        let ctl = controller(Arc::new(MemoryStore::new()));
        // Still observing 10% against a 20% target on the second run: the
        // previous factor did not change measured behavior, so it doubles.
        let first = ctl.recalibrate(1, 0.20, 100, 900).await.unwrap().unwrap();
        let second = ctl.recalibrate(1, 0.20, 100, 900).await.unwrap().unwrap();
        assert!((first - 2.0).abs() < EPS);
        assert!((second - 4.0).abs() < EPS);

        let ctl2 = controller(Arc::new(MemoryStore::new()));
        let first = ctl2.recalibrate(1, 0.20, 400, 600).await.unwrap().unwrap();
        let second = ctl2.recalibrate(1, 0.20, 400, 600).await.unwrap().unwrap();
        assert!((first - 0.5).abs() < EPS);
        assert!((second - 0.25).abs() < EPS);
    }

    #[tokio::test]
    async fn converging_clears_a_previous_factor() {
        let kv = Arc::new(MemoryStore::new());
        let ctl = controller(kv.clone());
        ctl.recalibrate(1, 0.20, 100, 900).await.unwrap();

        let factor = ctl.recalibrate(1, 0.20, 200, 800).await.unwrap();
        assert_eq!(factor, None);
        let store = RecalibrationStore::new(kv);
        assert_eq!(store.get_factor(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn no_signal_leaves_factor_untouched() {
        let kv = Arc::new(MemoryStore::new());
        let ctl = controller(kv.clone());
        ctl.recalibrate(1, 0.20, 100, 900).await.unwrap();

        let factor = ctl.recalibrate(1, 0.20, 0, 0).await.unwrap();
        assert_eq!(factor, None);
        let store = RecalibrationStore::new(kv);
        assert_eq!(store.get_factor(1).await.unwrap(), Some(2.0));
    }

    #[tokio::test]
    async fn factor_is_clamped() {
        let ctl = controller(Arc::new(MemoryStore::new()));
        // 1 kept out of 100k observed against a high target would compound
        // far past the ceiling within a few runs.
        for _ in 0..5 {
            ctl.recalibrate(1, 0.9, 1, 99_999).await.unwrap();
        }
        let factor = ctl.recalibrate(1, 0.9, 1, 99_999).await.unwrap().unwrap();
        assert_eq!(factor, MAX_FACTOR);
    }

    #[tokio::test]
    async fn invalid_target_is_skipped() {
        let ctl = controller(Arc::new(MemoryStore::new()));
        assert_eq!(ctl.recalibrate(1, 0.0, 10, 10).await.unwrap(), None);
        assert_eq!(ctl.recalibrate(1, 1.5, 10, 10).await.unwrap(), None);
    }
}
