//! Dynamic sampling rate computation.
//!
//! Decides, per organization/project, what fraction of telemetry events to
//! retain:
//!
//! - [`engine`] — pure math: low-volume project boost (water-filling
//!   budget redistribution), sliding-window tier forecasting, volume
//!   shorthand parsing.
//! - [`quotas`] — the [`QuotaService`] boundary trait the platform
//!   implements (blended rate, volume tiers).
//! - [`recalibrate`] — feedback controller nudging the observed keep ratio
//!   toward the target across runs.
//! - [`rules`] — assembles the externally visible rule list consumed by
//!   the ingestion layer.
//! - [`tasks`] — periodic task entry points invoked by the worker.

pub mod engine;
pub mod quotas;
pub mod recalibrate;
pub mod rules;
pub mod tasks;

pub use quotas::{QuotaService, StaticTierTable, VolumeTier};
pub use recalibrate::RecalibrationController;
pub use rules::{RuleGenerator, SamplingRule, SamplingValue};
