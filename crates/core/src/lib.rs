//! Shared primitives for the sieve sampling / detector engine.
//!
//! This crate has zero internal deps so it can be used by every other
//! workspace member:
//!
//! - [`types`] — id aliases and the canonical timestamp type.
//! - [`error`] — the shared [`CoreError`] enum.
//! - [`validate`] — range-checking helpers for sample rates and ratios.

pub mod error;
pub mod types;
pub mod validate;

pub use error::CoreError;
pub use types::{DetectorId, OrgId, ProjectId, Timestamp};
pub use validate::validate_unit_range;
