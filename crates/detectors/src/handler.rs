//! The stateful detector state machine.
//!
//! A handler consumes [`DataPacket`]s for one detector and turns them into
//! trigger/resolve results. All knobs (conditions, level thresholds) are
//! computed at construction; the handler mutates nothing but its state
//! manager afterwards.
//!
//! Per-packet evaluation:
//! 1. one batched state read for every group key in the packet;
//! 2. dedupe gate — a packet at or below the stored dedupe value is
//!    skipped, which makes at-least-once redelivery safe;
//! 3. condition evaluation — a value no condition covers is skipped as
//!    "insufficient information", not treated as OK;
//! 4. counter accumulation with consecutive semantics (levels above the
//!    candidate reset);
//! 5. a counter reaching exactly its threshold triggers; OK resolves;
//! 6. one atomic commit for the whole packet.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sieve_core::{DetectorId, ProjectId};
use sieve_store::KeyValueStore;

use crate::conditions::{
    build_thresholds, evaluate_conditions, ConditionMatch, DetectorCondition, LevelThreshold,
};
use crate::priority::DetectorPriorityLevel;
use crate::state::{DetectorStateManager, GroupKey};
use crate::DetectorError;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One unit of signal delivered to a detector.
#[derive(Debug, Clone)]
pub struct DataPacket {
    /// Monotonic sequence number; packets at or below the stored value are
    /// discarded.
    pub dedupe_value: u64,
    /// Raw value per group key; a whole-entity signal uses the `None` key.
    pub values: HashMap<GroupKey, f64>,
}

impl DataPacket {
    /// Packet carrying a single whole-entity value.
    pub fn single(dedupe_value: u64, value: f64) -> Self {
        Self {
            dedupe_value,
            values: HashMap::from([(None, value)]),
        }
    }
}

/// Static configuration for one detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub detector_id: DetectorId,
    pub project_id: ProjectId,
    /// Ordered condition list; first match wins.
    pub conditions: Vec<DetectorCondition>,
    /// Externally supplied per-level thresholds.
    pub level_thresholds: Vec<LevelThreshold>,
}

/// Occurrence emitted when a level triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueOccurrence {
    pub detector_id: DetectorId,
    pub project_id: ProjectId,
    pub fingerprint: Vec<String>,
    pub priority: DetectorPriorityLevel,
    pub value: f64,
    pub evidence_data: serde_json::Value,
}

/// Status-change message emitted when a triggered detector resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub detector_id: DetectorId,
    pub project_id: ProjectId,
    pub fingerprint: Vec<String>,
    pub new_status: DetectorPriorityLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_substatus: Option<String>,
}

/// Result of one group key's transition.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorResult {
    Triggered(IssueOccurrence),
    Resolved(StatusChange),
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// State machine turning a stream of data packets into trigger/resolve
/// results for one detector.
pub struct StatefulDetectorHandler {
    detector_id: DetectorId,
    project_id: ProjectId,
    conditions: Vec<DetectorCondition>,
    thresholds: BTreeMap<DetectorPriorityLevel, u64>,
    manager: DetectorStateManager,
}

impl StatefulDetectorHandler {
    /// Build a handler; the threshold map is computed here, once.
    pub fn new(config: DetectorConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let thresholds = build_thresholds(&config.level_thresholds);
        let counter_levels: Vec<DetectorPriorityLevel> = thresholds.keys().copied().collect();
        let manager = DetectorStateManager::new(store, config.detector_id, counter_levels);
        Self {
            detector_id: config.detector_id,
            project_id: config.project_id,
            conditions: config.conditions,
            thresholds,
            manager,
        }
    }

    /// Threshold map in effect (ascending severity).
    pub fn thresholds(&self) -> &BTreeMap<DetectorPriorityLevel, u64> {
        &self.thresholds
    }

    fn fingerprint(&self, group_key: &GroupKey) -> Vec<String> {
        match group_key {
            Some(group) => vec![format!("detector:{}:{}", self.detector_id, group)],
            None => vec![format!("detector:{}", self.detector_id)],
        }
    }

    /// Process one packet: evaluate every group key it carries, then commit
    /// all buffered state in a single batch.
    ///
    /// A store failure (read or commit) aborts the cycle; the caller must
    /// redeliver the packet. The dedupe gate makes that redelivery safe.
    pub async fn evaluate(
        &mut self,
        packet: &DataPacket,
    ) -> Result<Vec<DetectorResult>, DetectorError> {
        let group_keys: Vec<GroupKey> = packet.values.keys().cloned().collect();
        let state = self.manager.get_state_data(&group_keys).await?;

        let mut results = Vec::new();
        for (group_key, &value) in &packet.values {
            let data = &state[group_key];

            if packet.dedupe_value <= data.dedupe_value {
                tracing::debug!(
                    detector_id = self.detector_id,
                    dedupe_value = packet.dedupe_value,
                    stored = data.dedupe_value,
                    "duplicate packet; skipping group key"
                );
                continue;
            }

            let candidate = match evaluate_conditions(&self.conditions, value) {
                ConditionMatch::Matched(level) => level,
                ConditionMatch::NoMatch => {
                    tracing::debug!(
                        detector_id = self.detector_id,
                        value,
                        "no condition matched; skipping group key"
                    );
                    continue;
                }
            };

            self.manager
                .enqueue_dedupe_update(group_key.clone(), packet.dedupe_value);

            if candidate == DetectorPriorityLevel::Ok {
                if let Some(result) = self.process_resolve(group_key, data) {
                    results.push(result);
                }
            } else if let Some(result) = self.process_trigger(group_key, data, candidate, value) {
                results.push(result);
            }
        }

        self.manager.commit_state_updates().await?;
        Ok(results)
    }

    /// OK path: reset all non-OK counters; emit a resolve only when the
    /// detector was actually triggered.
    fn process_resolve(
        &mut self,
        group_key: &GroupKey,
        data: &crate::state::DetectorStateData,
    ) -> Option<DetectorResult> {
        let mut updates: HashMap<DetectorPriorityLevel, Option<u64>> = self
            .thresholds
            .keys()
            .filter(|&&level| level != DetectorPriorityLevel::Ok)
            .map(|&level| (level, None))
            .collect();
        updates.insert(
            DetectorPriorityLevel::Ok,
            Some(data.counter(DetectorPriorityLevel::Ok).unwrap_or(0) + 1),
        );
        self.manager.enqueue_counter_update(group_key.clone(), updates);

        if !data.is_triggered {
            return None;
        }

        self.manager
            .enqueue_state_update(group_key.clone(), false, DetectorPriorityLevel::Ok);
        Some(DetectorResult::Resolved(StatusChange {
            detector_id: self.detector_id,
            project_id: self.project_id,
            fingerprint: self.fingerprint(group_key),
            new_status: DetectorPriorityLevel::Ok,
            new_substatus: None,
        }))
    }

    /// Non-OK path: accumulate counters with consecutive semantics and
    /// trigger when a level reaches exactly its threshold.
    fn process_trigger(
        &mut self,
        group_key: &GroupKey,
        data: &crate::state::DetectorStateData,
        candidate: DetectorPriorityLevel,
        value: f64,
    ) -> Option<DetectorResult> {
        let mut updates: HashMap<DetectorPriorityLevel, Option<u64>> = HashMap::new();
        // Highest-severity ready level; BTreeMap iterates ascending, so the
        // last assignment wins.
        let mut ready: Option<(DetectorPriorityLevel, u64, u64)> = None;

        for (&level, &threshold) in &self.thresholds {
            if level == DetectorPriorityLevel::Ok {
                continue;
            }
            if level <= candidate {
                let next = data.counter(level).unwrap_or(0) + 1;
                updates.insert(level, Some(next));
                if next >= threshold {
                    ready = Some((level, next, threshold));
                }
            } else {
                // A lower-severity observation breaks this level's streak.
                updates.insert(level, None);
            }
        }
        self.manager.enqueue_counter_update(group_key.clone(), updates);

        let (new_level, count, threshold) = ready?;
        if count != threshold {
            // Already past threshold: the trigger for this level fired on
            // an earlier cycle.
            return None;
        }
        if data.is_triggered && data.status == new_level {
            return None;
        }

        self.manager
            .enqueue_state_update(group_key.clone(), true, new_level);
        Some(DetectorResult::Triggered(IssueOccurrence {
            detector_id: self.detector_id,
            project_id: self.project_id,
            fingerprint: self.fingerprint(group_key),
            priority: new_level,
            value,
            evidence_data: serde_json::json!({
                "value": value,
                "group_key": group_key,
            }),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
