//! Durable detector state.
//!
//! State is keyed by `(detector_id, group_key)` and owned exclusively by
//! [`DetectorStateManager`]; handlers never write counters directly, they
//! enqueue updates and commit once per evaluation cycle.
//!
//! Storage layout: the `(is_triggered, status, dedupe_value)` triple is one
//! JSON value under `detector:<id>:<group>:state` so the dedupe gate and
//! trigger status are always written together; counters are integer
//! strings under `detector:<id>:<group>:<level>`. Reading G group keys
//! with C configured counters therefore costs exactly `G * (1 + C)` gets
//! in a single pipelined multi-get.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sieve_core::DetectorId;
use sieve_store::{KeyValueStore, StoreError, WriteBatch};

use crate::priority::DetectorPriorityLevel;

/// Sub-entity key within a detector; `None` means "the whole entity".
pub type GroupKey = Option<String>;

/// Per-group detector state as seen by the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorStateData {
    pub group_key: GroupKey,
    pub is_triggered: bool,
    pub status: DetectorPriorityLevel,
    pub dedupe_value: u64,
    pub counter_updates: HashMap<DetectorPriorityLevel, Option<u64>>,
}

impl DetectorStateData {
    /// Zero-value default for an unknown group key.
    pub fn default_for(group_key: GroupKey, counter_levels: &[DetectorPriorityLevel]) -> Self {
        Self {
            group_key,
            is_triggered: false,
            status: DetectorPriorityLevel::Ok,
            dedupe_value: 0,
            counter_updates: counter_levels.iter().map(|&l| (l, None)).collect(),
        }
    }

    /// Current counter value for a level, `None` when not accumulating.
    pub fn counter(&self, level: DetectorPriorityLevel) -> Option<u64> {
        self.counter_updates.get(&level).copied().flatten()
    }
}

/// The persisted shape of the dedupe/trigger triple.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    is_triggered: bool,
    status: DetectorPriorityLevel,
    dedupe_value: u64,
}

/// Owns read-modify-write access to per-group detector state.
///
/// Single-consumer by design: one manager instance serves one handler, and
/// packets are processed one at a time per partition, so methods take
/// `&mut self` and no locking is needed beyond the store's own batch
/// atomicity.
pub struct DetectorStateManager {
    store: Arc<dyn KeyValueStore>,
    detector_id: DetectorId,
    counter_levels: Vec<DetectorPriorityLevel>,
    /// View of the last read/committed state per group key.
    loaded: HashMap<GroupKey, DetectorStateData>,
    pending_dedupe: HashMap<GroupKey, u64>,
    pending_counters: HashMap<GroupKey, HashMap<DetectorPriorityLevel, Option<u64>>>,
    pending_state: HashMap<GroupKey, (bool, DetectorPriorityLevel)>,
}

impl DetectorStateManager {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        detector_id: DetectorId,
        counter_levels: Vec<DetectorPriorityLevel>,
    ) -> Self {
        Self {
            store,
            detector_id,
            counter_levels,
            loaded: HashMap::new(),
            pending_dedupe: HashMap::new(),
            pending_counters: HashMap::new(),
            pending_state: HashMap::new(),
        }
    }

    /// Levels that have a persisted counter.
    pub fn counter_levels(&self) -> &[DetectorPriorityLevel] {
        &self.counter_levels
    }

    fn group_segment(group_key: &GroupKey) -> &str {
        group_key.as_deref().unwrap_or("")
    }

    fn state_key(&self, group_key: &GroupKey) -> String {
        format!(
            "detector:{}:{}:state",
            self.detector_id,
            Self::group_segment(group_key)
        )
    }

    fn counter_key(&self, group_key: &GroupKey, level: DetectorPriorityLevel) -> String {
        format!(
            "detector:{}:{}:{}",
            self.detector_id,
            Self::group_segment(group_key),
            level.as_str()
        )
    }

    /// Fetch state for every requested group key in ONE batched round-trip.
    ///
    /// Unknown keys get the zero-value default. Store failures propagate:
    /// treating an outage as "all counters zero" would corrupt the
    /// hysteresis logic, so the evaluation cycle must be retried instead.
    pub async fn get_state_data(
        &mut self,
        group_keys: &[GroupKey],
    ) -> Result<HashMap<GroupKey, DetectorStateData>, StoreError> {
        let fields_per_group = 1 + self.counter_levels.len();
        let mut keys = Vec::with_capacity(group_keys.len() * fields_per_group);
        for group_key in group_keys {
            keys.push(self.state_key(group_key));
            for &level in &self.counter_levels {
                keys.push(self.counter_key(group_key, level));
            }
        }

        let values = self.store.multi_get(&keys).await?;

        // Prune the local view down to keys still carrying pending writes;
        // it would otherwise grow with every distinct group key ever read.
        {
            let (loaded, dedupe, counters, state) = (
                &mut self.loaded,
                &self.pending_dedupe,
                &self.pending_counters,
                &self.pending_state,
            );
            loaded.retain(|key, _| {
                dedupe.contains_key(key) || counters.contains_key(key) || state.contains_key(key)
            });
        }

        let mut result = HashMap::with_capacity(group_keys.len());
        for (i, group_key) in group_keys.iter().enumerate() {
            let chunk = &values[i * fields_per_group..(i + 1) * fields_per_group];
            let mut data =
                DetectorStateData::default_for(group_key.clone(), &self.counter_levels);

            if let Some(raw) = &chunk[0] {
                match serde_json::from_str::<PersistedState>(raw) {
                    Ok(persisted) => {
                        data.is_triggered = persisted.is_triggered;
                        data.status = persisted.status;
                        data.dedupe_value = persisted.dedupe_value;
                    }
                    Err(err) => {
                        tracing::warn!(
                            detector_id = self.detector_id,
                            group_key = Self::group_segment(group_key),
                            %err,
                            "corrupt persisted detector state; using defaults"
                        );
                    }
                }
            }
            for (j, &level) in self.counter_levels.iter().enumerate() {
                let value = chunk[1 + j].as_deref().and_then(|s| s.parse::<u64>().ok());
                data.counter_updates.insert(level, value);
            }

            self.loaded.insert(group_key.clone(), data.clone());
            result.insert(group_key.clone(), data);
        }
        Ok(result)
    }

    /// Buffer a dedupe-value write. No I/O until commit.
    pub fn enqueue_dedupe_update(&mut self, group_key: GroupKey, dedupe_value: u64) {
        self.pending_dedupe.insert(group_key, dedupe_value);
    }

    /// Buffer counter writes; a `None` value deletes that counter.
    pub fn enqueue_counter_update(
        &mut self,
        group_key: GroupKey,
        updates: HashMap<DetectorPriorityLevel, Option<u64>>,
    ) {
        self.pending_counters
            .entry(group_key)
            .or_default()
            .extend(updates);
    }

    /// Buffer a trigger-status write.
    pub fn enqueue_state_update(
        &mut self,
        group_key: GroupKey,
        is_triggered: bool,
        status: DetectorPriorityLevel,
    ) {
        self.pending_state.insert(group_key, (is_triggered, status));
    }

    /// Flush all buffered writes in one atomic batch.
    ///
    /// On success the buffers and the local view are cleared; the next
    /// cycle re-reads committed state. On failure both are left intact so
    /// the caller can retry the whole cycle.
    pub async fn commit_state_updates(&mut self) -> Result<(), StoreError> {
        if self.pending_dedupe.is_empty()
            && self.pending_counters.is_empty()
            && self.pending_state.is_empty()
        {
            return Ok(());
        }

        let mut group_keys: Vec<GroupKey> = Vec::new();
        for key in self
            .pending_dedupe
            .keys()
            .chain(self.pending_state.keys())
            .chain(self.pending_counters.keys())
        {
            if !group_keys.contains(key) {
                group_keys.push(key.clone());
            }
        }

        let mut batch = WriteBatch::new();

        for group_key in &group_keys {
            let dedupe = self.pending_dedupe.get(group_key).copied();
            let state = self.pending_state.get(group_key).copied();
            if dedupe.is_some() || state.is_some() {
                let mut data = self.loaded.get(group_key).cloned().unwrap_or_else(|| {
                    DetectorStateData::default_for(group_key.clone(), &self.counter_levels)
                });
                if let Some(dedupe_value) = dedupe {
                    data.dedupe_value = dedupe_value;
                }
                if let Some((is_triggered, status)) = state {
                    data.is_triggered = is_triggered;
                    data.status = status;
                }
                let persisted = PersistedState {
                    is_triggered: data.is_triggered,
                    status: data.status,
                    dedupe_value: data.dedupe_value,
                };
                batch.set(self.state_key(group_key), serde_json::to_string(&persisted)?);
            }

            if let Some(updates) = self.pending_counters.get(group_key) {
                for (&level, &value) in updates {
                    match value {
                        Some(count) => {
                            batch.set(self.counter_key(group_key, level), count.to_string())
                        }
                        None => batch.delete(self.counter_key(group_key, level)),
                    }
                }
            }
        }

        self.store.apply(batch).await?;

        // Committed state is durable; the next cycle re-reads it, so the
        // local view can be dropped wholesale.
        self.loaded.clear();
        self.pending_dedupe.clear();
        self.pending_counters.clear();
        self.pending_state.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sieve_store::MemoryStore;
    use DetectorPriorityLevel::*;

    fn manager(kv: Arc<MemoryStore>) -> DetectorStateManager {
        DetectorStateManager::new(kv, 7, vec![Ok, Low, High])
    }

    #[tokio::test]
    async fn unknown_group_keys_get_zero_value_defaults() {
        let mut mgr = manager(Arc::new(MemoryStore::new()));
        let state = mgr
            .get_state_data(&[None, Some("checkout".into())])
            .await
            .unwrap();

        let data = &state[&None];
        assert!(!data.is_triggered);
        assert_eq!(data.status, Ok);
        assert_eq!(data.dedupe_value, 0);
        assert_eq!(data.counter(Low), None);
        assert_eq!(state.len(), 2);
    }

    #[tokio::test]
    async fn read_is_one_round_trip_with_one_plus_counters_gets_per_key() {
        let kv = Arc::new(MemoryStore::new());
        let mut mgr = manager(kv.clone());

        let keys: Vec<GroupKey> =
            vec![None, Some("a".into()), Some("b".into())];
        mgr.get_state_data(&keys).await.unwrap();

        // 3 counters configured -> 3 * (1 + 3) = 12 gets in 1 pipeline.
        assert_eq!(kv.multi_get_rounds(), 1);
        assert_eq!(kv.multi_get_keys_fetched(), 3 * (1 + 3));
    }

    #[tokio::test]
    async fn enqueued_updates_are_invisible_until_commit() {
        let kv = Arc::new(MemoryStore::new());
        let mut mgr = manager(kv.clone());
        let gk: GroupKey = Some("a".into());

        mgr.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
        mgr.enqueue_dedupe_update(gk.clone(), 5);
        mgr.enqueue_counter_update(gk.clone(), HashMap::from([(Low, Some(2))]));
        mgr.enqueue_state_update(gk.clone(), true, Low);

        // A second manager over the same store sees nothing yet.
        let mut other = manager(kv.clone());
        let state = other.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
        assert_eq!(state[&gk].dedupe_value, 0);
        assert!(!state[&gk].is_triggered);

        mgr.commit_state_updates().await.unwrap();

        let state = other.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
        assert_eq!(state[&gk].dedupe_value, 5);
        assert!(state[&gk].is_triggered);
        assert_eq!(state[&gk].status, Low);
        assert_eq!(state[&gk].counter(Low), Some(2));
    }

    #[tokio::test]
    async fn none_counter_update_deletes_the_counter() {
        let kv = Arc::new(MemoryStore::new());
        let mut mgr = manager(kv.clone());
        let gk: GroupKey = None;

        mgr.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
        mgr.enqueue_counter_update(gk.clone(), HashMap::from([(High, Some(4))]));
        mgr.commit_state_updates().await.unwrap();
        assert_eq!(kv.get("detector:7::high").await.unwrap().as_deref(), Some("4"));

        mgr.enqueue_counter_update(gk.clone(), HashMap::from([(High, None)]));
        mgr.commit_state_updates().await.unwrap();
        assert_eq!(kv.get("detector:7::high").await.unwrap(), None);
    }

    #[tokio::test]
    async fn local_view_does_not_grow_without_bound() {
        let kv = Arc::new(MemoryStore::new());
        let mut mgr = manager(kv);

        for i in 0..100 {
            let gk: GroupKey = Some(format!("group-{i}"));
            mgr.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
            mgr.enqueue_dedupe_update(gk, i);
            mgr.commit_state_updates().await.unwrap();
        }
        assert!(mgr.loaded.is_empty());

        // A key with a write still pending survives the prune on the next
        // read; everything else is dropped.
        let a: GroupKey = Some("a".into());
        let b: GroupKey = Some("b".into());
        mgr.get_state_data(std::slice::from_ref(&a)).await.unwrap();
        mgr.enqueue_state_update(a.clone(), true, High);
        mgr.get_state_data(std::slice::from_ref(&b)).await.unwrap();
        assert!(mgr.loaded.contains_key(&a));
        assert_eq!(mgr.loaded.len(), 2);

        mgr.commit_state_updates().await.unwrap();
        assert!(mgr.loaded.is_empty());

        // The trigger status written through the pruned view is intact.
        let state = mgr.get_state_data(std::slice::from_ref(&a)).await.unwrap();
        assert!(state[&a].is_triggered);
        assert_eq!(state[&a].status, High);
    }

    #[tokio::test]
    async fn commit_with_nothing_pending_is_a_noop() {
        let kv = Arc::new(MemoryStore::new());
        let mut mgr = manager(kv.clone());
        mgr.commit_state_updates().await.unwrap();
    }

    #[tokio::test]
    async fn failed_commit_keeps_buffers_for_retry() {
        let kv = Arc::new(MemoryStore::new());
        let mut mgr = manager(kv.clone());
        let gk: GroupKey = None;

        mgr.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
        mgr.enqueue_dedupe_update(gk.clone(), 9);

        kv.set_unavailable(true);
        assert_matches!(
            mgr.commit_state_updates().await,
            Err(StoreError::Unavailable(_))
        );

        kv.set_unavailable(false);
        mgr.commit_state_updates().await.unwrap();

        let mut other = manager(kv);
        let state = other.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
        assert_eq!(state[&gk].dedupe_value, 9);
    }

    #[tokio::test]
    async fn read_outage_propagates_instead_of_defaulting() {
        let kv = Arc::new(MemoryStore::new());
        let mut mgr = manager(kv.clone());
        kv.set_unavailable(true);

        assert_matches!(
            mgr.get_state_data(&[None]).await,
            Err(StoreError::Unavailable(_))
        );
    }

    #[tokio::test]
    async fn detectors_are_namespaced_apart() {
        let kv = Arc::new(MemoryStore::new());
        let mut a = DetectorStateManager::new(kv.clone(), 1, vec![Ok, Low]);
        let mut b = DetectorStateManager::new(kv.clone(), 2, vec![Ok, Low]);
        let gk: GroupKey = None;

        a.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
        a.enqueue_dedupe_update(gk.clone(), 42);
        a.commit_state_updates().await.unwrap();

        let state = b.get_state_data(std::slice::from_ref(&gk)).await.unwrap();
        assert_eq!(state[&gk].dedupe_value, 0);
    }
}
