//! Key-value state layer for the sampling / detector engine.
//!
//! All durable engine state (detector counters, cached sample rates,
//! recalibration factors) lives behind the [`KeyValueStore`] trait so the
//! surrounding platform can plug in its own backing store. This crate
//! ships:
//!
//! - [`kv`] — the store trait, [`WriteBatch`], and [`StoreError`].
//! - [`memory`] — an in-memory implementation with round-trip
//!   instrumentation, used by the worker binary and by tests.
//! - [`sliding_window`] — cached per-project sliding-window sample rates
//!   with change-triggered config invalidation.
//! - [`boost`] — cached per-project boosted sample rates.
//! - [`recalibration`] — the per-org multiplicative adjustment factor.

pub mod boost;
pub mod kv;
pub mod memory;
pub mod recalibration;
pub mod sliding_window;

pub use boost::ProjectBoostStore;
pub use kv::{KeyValueStore, StoreError, WriteBatch, WriteOp};
pub use memory::MemoryStore;
pub use recalibration::RecalibrationStore;
pub use sliding_window::{SlidingWindowStore, SLIDING_WINDOW_TTL};
