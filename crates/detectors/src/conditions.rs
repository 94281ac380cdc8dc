//! Condition evaluation and threshold-map construction.
//!
//! Conditions are supplied by the surrounding platform as an ordered list;
//! the first match wins. "No condition matched" is a typed outcome
//! ([`ConditionMatch::NoMatch`]) rather than an implicit fallthrough: the
//! handler skips such group keys as "insufficient information", it does
//! not treat them as OK.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::priority::DetectorPriorityLevel;

/// Comparison operator for a detector condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Comparison {
    fn matches(&self, observed: f64, value: f64) -> bool {
        match self {
            Comparison::Gt => observed > value,
            Comparison::Gte => observed >= value,
            Comparison::Lt => observed < value,
            Comparison::Lte => observed <= value,
            Comparison::Eq => observed == value,
        }
    }
}

/// One externally supplied condition: "value `comparison` bound ⇒ level".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorCondition {
    pub comparison: Comparison,
    pub value: f64,
    pub level: DetectorPriorityLevel,
}

/// Outcome of evaluating a raw value against the condition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionMatch {
    Matched(DetectorPriorityLevel),
    NoMatch,
}

/// Evaluate `observed` against the ordered condition list.
pub fn evaluate_conditions(
    conditions: &[DetectorCondition],
    observed: f64,
) -> ConditionMatch {
    for condition in conditions {
        if condition.comparison.matches(observed, condition.value) {
            return ConditionMatch::Matched(condition.level);
        }
    }
    ConditionMatch::NoMatch
}

/// Externally supplied threshold for one priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelThreshold {
    pub level: DetectorPriorityLevel,
    pub threshold: u64,
}

/// Build the per-level threshold map at handler construction time.
///
/// `OK -> 1` is always present. Invalid entries (zero threshold, or an OK
/// override other than 1) are skipped with a warning; construction never
/// fails outright.
pub fn build_thresholds(
    config: &[LevelThreshold],
) -> BTreeMap<DetectorPriorityLevel, u64> {
    let mut thresholds = BTreeMap::new();
    thresholds.insert(DetectorPriorityLevel::Ok, 1);

    for entry in config {
        if entry.threshold == 0 {
            tracing::warn!(
                level = entry.level.as_str(),
                "zero threshold in detector config; level omitted"
            );
            continue;
        }
        if entry.level == DetectorPriorityLevel::Ok && entry.threshold != 1 {
            tracing::warn!(
                threshold = entry.threshold,
                "OK threshold is fixed at 1; override ignored"
            );
            continue;
        }
        thresholds.insert(entry.level, entry.threshold);
    }

    thresholds
}

#[cfg(test)]
mod tests {
    use super::*;
    use DetectorPriorityLevel::*;

    fn conditions() -> Vec<DetectorCondition> {
        vec![
            DetectorCondition { comparison: Comparison::Gt, value: 90.0, level: High },
            DetectorCondition { comparison: Comparison::Gt, value: 70.0, level: Medium },
            DetectorCondition { comparison: Comparison::Gt, value: 50.0, level: Low },
            DetectorCondition { comparison: Comparison::Lte, value: 40.0, level: Ok },
        ]
    }

    #[test]
    fn first_matching_condition_wins() {
        assert_eq!(evaluate_conditions(&conditions(), 95.0), ConditionMatch::Matched(High));
        assert_eq!(evaluate_conditions(&conditions(), 80.0), ConditionMatch::Matched(Medium));
        assert_eq!(evaluate_conditions(&conditions(), 60.0), ConditionMatch::Matched(Low));
        assert_eq!(evaluate_conditions(&conditions(), 10.0), ConditionMatch::Matched(Ok));
    }

    #[test]
    fn value_in_a_coverage_hole_yields_no_match() {
        // 45 sits between the Ok ceiling (<= 40) and the Low floor (> 50).
        assert_eq!(evaluate_conditions(&conditions(), 45.0), ConditionMatch::NoMatch);
    }

    #[test]
    fn empty_condition_list_never_matches() {
        assert_eq!(evaluate_conditions(&[], 10.0), ConditionMatch::NoMatch);
    }

    #[test]
    fn nan_values_never_match() {
        assert_eq!(evaluate_conditions(&conditions(), f64::NAN), ConditionMatch::NoMatch);
    }

    #[test]
    fn thresholds_always_include_ok() {
        let thresholds = build_thresholds(&[]);
        assert_eq!(thresholds.get(&Ok), Some(&1));
        assert_eq!(thresholds.len(), 1);
    }

    #[test]
    fn thresholds_keep_valid_levels() {
        let thresholds = build_thresholds(&[
            LevelThreshold { level: Low, threshold: 3 },
            LevelThreshold { level: High, threshold: 5 },
        ]);
        assert_eq!(thresholds.get(&Low), Some(&3));
        assert_eq!(thresholds.get(&High), Some(&5));
        assert_eq!(thresholds.get(&Medium), None);
    }

    #[test]
    fn invalid_threshold_entries_are_skipped() {
        let thresholds = build_thresholds(&[
            LevelThreshold { level: Low, threshold: 0 },
            LevelThreshold { level: Ok, threshold: 7 },
            LevelThreshold { level: High, threshold: 2 },
        ]);
        assert_eq!(thresholds.get(&Low), None);
        assert_eq!(thresholds.get(&Ok), Some(&1));
        assert_eq!(thresholds.get(&High), Some(&2));
    }
}
