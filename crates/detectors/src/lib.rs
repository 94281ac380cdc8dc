//! Stateful detector evaluation.
//!
//! A detector consumes a stream of per-entity signal values, accumulates
//! hysteresis counters per priority level, and emits trigger/resolve
//! transitions with at-most-once deduplication:
//!
//! - [`priority`] — the ordered [`DetectorPriorityLevel`] enum.
//! - [`conditions`] — ordered condition evaluation with a typed
//!   matched/no-match outcome, and threshold-map construction.
//! - [`state`] — [`DetectorStateManager`]: batched reads, buffered
//!   writes, one atomic commit per evaluation cycle.
//! - [`handler`] — [`StatefulDetectorHandler`]: the state machine.
//! - [`registry`] — explicit kind → handler-factory registry.

pub mod conditions;
pub mod handler;
pub mod priority;
pub mod registry;
pub mod state;

pub use conditions::{
    build_thresholds, evaluate_conditions, Comparison, ConditionMatch, DetectorCondition,
    LevelThreshold,
};
pub use handler::{
    DataPacket, DetectorConfig, DetectorResult, IssueOccurrence, StatefulDetectorHandler,
    StatusChange,
};
pub use priority::DetectorPriorityLevel;
pub use registry::{DetectorKind, DetectorRegistry};
pub use state::{DetectorStateData, DetectorStateManager, GroupKey};

/// Errors surfaced by detector evaluation.
///
/// A store failure during a read or commit is fatal to the evaluation
/// cycle and must be retried by the caller; silently treating it as empty
/// state would corrupt the hysteresis counters.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error(transparent)]
    Store(#[from] sieve_store::StoreError),
}
