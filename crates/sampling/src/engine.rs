//! Pure sampling-rate math — no I/O, no hidden state.
//!
//! Everything here is deterministic given identical inputs, and every
//! failure path degrades to the caller-supplied fallback rate rather than
//! raising.

use std::collections::HashMap;

use sieve_core::{CoreError, OrgId, ProjectId};

use crate::quotas::QuotaService;

/// Hours in the 30-day volume horizon tiers are defined against.
const MONTH_HOURS: f64 = 30.0 * 24.0;

// ---------------------------------------------------------------------------
// Low-volume project boost
// ---------------------------------------------------------------------------

/// Redistribute a fixed retained-event budget across projects, inversely
/// proportional to volume.
///
/// Water-filling: projects are visited in ascending volume order and each
/// is offered an equal share of the remaining budget. A project whose whole
/// volume fits inside its share is fully retained (rate 1.0) and only its
/// actual volume is spent; everyone else spends exactly one share and gets
/// `share / volume`.
///
/// A project with zero observed volume gets 1.0: with no evidence of
/// traffic there is nothing to reason about, so retain everything.
pub fn compute_project_boost(
    volumes: &HashMap<ProjectId, u64>,
    total_budget: f64,
) -> HashMap<ProjectId, f64> {
    let mut rates = HashMap::with_capacity(volumes.len());

    let mut active: Vec<(ProjectId, u64)> = Vec::new();
    for (&project_id, &volume) in volumes {
        if volume == 0 {
            rates.insert(project_id, 1.0);
        } else {
            active.push((project_id, volume));
        }
    }
    // Ascending volume, project id as tie-breaker for determinism.
    active.sort_by_key(|&(project_id, volume)| (volume, project_id));

    let mut remaining_budget = total_budget.max(0.0);
    let mut remaining = active.len();
    for (project_id, volume) in active {
        let share = remaining_budget / remaining as f64;
        let volume_f = volume as f64;
        if volume_f <= share {
            rates.insert(project_id, 1.0);
            remaining_budget -= volume_f;
        } else {
            rates.insert(project_id, (share / volume_f).clamp(0.0, 1.0));
            remaining_budget -= share;
        }
        remaining -= 1;
    }

    rates
}

// ---------------------------------------------------------------------------
// Sliding window rate
// ---------------------------------------------------------------------------

/// Forecast a 30-day volume from a short observation window and return the
/// matching tier's sample rate.
///
/// Falls back to `blended_rate` when the window is degenerate, the quota
/// service has no tier for the forecast, or the tier carries a rate outside
/// `[0, 1]`.
pub fn compute_sliding_window_rate(
    org_id: OrgId,
    window_volume: u64,
    window_hours: u64,
    blended_rate: f64,
    quotas: &dyn QuotaService,
) -> f64 {
    let forecast = match extrapolate_monthly_volume(window_volume, window_hours) {
        Some(forecast) => forecast,
        None => {
            tracing::warn!(org_id, window_hours, "degenerate sliding window; using blended rate");
            return blended_rate;
        }
    };

    match quotas.transaction_sampling_tier_for_volume(org_id, forecast) {
        Some((tier_volume, rate)) => {
            if sieve_core::validate_unit_range(rate, "tier rate").is_err() {
                tracing::warn!(org_id, tier_volume, rate, "tier rate out of range; using blended rate");
                return blended_rate;
            }
            tracing::debug!(org_id, forecast, tier_volume, rate, "sliding window tier selected");
            rate
        }
        None => {
            tracing::debug!(org_id, forecast, "no tier for forecast volume; using blended rate");
            blended_rate
        }
    }
}

/// Extrapolate an observed window volume to the 30-day horizon.
///
/// `None` for a zero-length window.
pub fn extrapolate_monthly_volume(window_volume: u64, window_hours: u64) -> Option<f64> {
    if window_hours == 0 {
        return None;
    }
    Some(window_volume as f64 * (MONTH_HOURS / window_hours as f64))
}

// ---------------------------------------------------------------------------
// Volume shorthand
// ---------------------------------------------------------------------------

/// Parse a volume with an optional `k`/`m`/`b` suffix (1e3/1e6/1e9).
///
/// Decimals are preserved: `"1.5m"` parses to `1_500_000.0`. Suffixes are
/// case-insensitive.
pub fn parse_volume(input: &str) -> Result<f64, CoreError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("empty volume string".into()));
    }

    let (number, multiplier) = match trimmed.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&trimmed[..trimmed.len() - 1], 1e3),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&trimmed[..trimmed.len() - 1], 1e6),
        Some(c) if c.eq_ignore_ascii_case(&'b') => (&trimmed[..trimmed.len() - 1], 1e9),
        _ => (trimmed, 1.0),
    };

    let value: f64 = number
        .parse()
        .map_err(|_| CoreError::Validation(format!("unparseable volume: {input:?}")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(CoreError::Validation(format!(
            "volume must be finite and non-negative, got {input:?}"
        )));
    }
    Ok(value * multiplier)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
