//! Detector priority levels.

use serde::{Deserialize, Serialize};

/// Ordered priority level; the derive order is the severity order used for
/// threshold comparison (`Ok < Low < Medium < High`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DetectorPriorityLevel {
    Ok,
    Low,
    Medium,
    High,
}

impl DetectorPriorityLevel {
    /// String representation used in storage keys and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorPriorityLevel::Ok => "ok",
            DetectorPriorityLevel::Low => "low",
            DetectorPriorityLevel::Medium => "medium",
            DetectorPriorityLevel::High => "high",
        }
    }

    /// Parse the storage representation back.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(DetectorPriorityLevel::Ok),
            "low" => Some(DetectorPriorityLevel::Low),
            "medium" => Some(DetectorPriorityLevel::Medium),
            "high" => Some(DetectorPriorityLevel::High),
            _ => None,
        }
    }

    /// All levels in ascending severity order.
    pub const ALL: [DetectorPriorityLevel; 4] = [
        DetectorPriorityLevel::Ok,
        DetectorPriorityLevel::Low,
        DetectorPriorityLevel::Medium,
        DetectorPriorityLevel::High,
    ];
}
