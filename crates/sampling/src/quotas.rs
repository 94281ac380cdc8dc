//! Quota service boundary.
//!
//! The surrounding platform owns billing and quota policy; the engine only
//! consumes two synchronous lookups through [`QuotaService`].
//! [`StaticTierTable`] is the in-tree implementation used by the worker
//! binary and by tests.

use sieve_core::{CoreError, OrgId};

use crate::engine::parse_volume;

/// External quota collaborator.
pub trait QuotaService: Send + Sync {
    /// Base sample rate for an org, blended across its plan and usage.
    fn blended_sample_rate(&self, org_id: OrgId) -> f64;

    /// Tier `(tier_volume, rate)` covering a forecast monthly volume, or
    /// `None` when no tier applies (callers fall back to the blended rate).
    fn transaction_sampling_tier_for_volume(
        &self,
        org_id: OrgId,
        volume: f64,
    ) -> Option<(f64, f64)>;
}

/// One volume band: forecasts up to `volume` sample at `rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeTier {
    pub volume: f64,
    pub rate: f64,
}

/// Fixed tier table shared by every org.
#[derive(Debug, Clone)]
pub struct StaticTierTable {
    blended_rate: f64,
    tiers: Vec<VolumeTier>,
}

impl StaticTierTable {
    /// Build from already-numeric tiers. Tiers are sorted by volume.
    pub fn new(blended_rate: f64, mut tiers: Vec<VolumeTier>) -> Self {
        tiers.sort_by(|a, b| a.volume.total_cmp(&b.volume));
        Self { blended_rate, tiers }
    }

    /// Build from shorthand volume boundaries, e.g. `[("100k", 1.0), ("1m", 0.5)]`.
    pub fn from_shorthand(
        blended_rate: f64,
        entries: &[(&str, f64)],
    ) -> Result<Self, CoreError> {
        let tiers = entries
            .iter()
            .map(|&(volume, rate)| {
                Ok(VolumeTier {
                    volume: parse_volume(volume)?,
                    rate,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        Ok(Self::new(blended_rate, tiers))
    }
}

impl QuotaService for StaticTierTable {
    fn blended_sample_rate(&self, _org_id: OrgId) -> f64 {
        self.blended_rate
    }

    fn transaction_sampling_tier_for_volume(
        &self,
        _org_id: OrgId,
        volume: f64,
    ) -> Option<(f64, f64)> {
        self.tiers
            .iter()
            .find(|tier| volume <= tier.volume)
            .map(|tier| (tier.volume, tier.rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shorthand_table_parses_and_sorts() {
        let table =
            StaticTierTable::from_shorthand(0.25, &[("1m", 0.5), ("100k", 1.0), ("1b", 0.01)])
                .unwrap();

        assert_eq!(
            table.transaction_sampling_tier_for_volume(1, 50_000.0),
            Some((100_000.0, 1.0))
        );
        assert_eq!(
            table.transaction_sampling_tier_for_volume(1, 500_000.0),
            Some((1_000_000.0, 0.5))
        );
        assert_eq!(table.transaction_sampling_tier_for_volume(1, 2e9), None);
    }

    #[test]
    fn shorthand_table_rejects_bad_volumes() {
        assert!(StaticTierTable::from_shorthand(0.25, &[("oops", 1.0)]).is_err());
    }

    #[test]
    fn boundary_volume_belongs_to_its_tier() {
        let table = StaticTierTable::new(
            0.25,
            vec![VolumeTier { volume: 100.0, rate: 1.0 }],
        );
        assert_eq!(
            table.transaction_sampling_tier_for_volume(1, 100.0),
            Some((100.0, 1.0))
        );
        assert_eq!(table.transaction_sampling_tier_for_volume(1, 100.1), None);
    }
}
