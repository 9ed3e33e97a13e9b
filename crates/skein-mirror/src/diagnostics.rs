//! Read-only diagnostics snapshot
//!
//! Consumed by status/health endpoints; safe to request concurrently with
//! the task loop because it is cloned out of one locked pause-state view.

use crate::pause_config::EffectiveManualPauseSet;
use crate::types::{AssignmentSet, PartitionKey};
use serde::Serialize;
use std::collections::BTreeSet;

/// Point-in-time view of a task's partition state
#[derive(Debug, Clone, Serialize)]
pub struct TaskDiagnostics {
    /// Task name
    pub task: String,
    /// Partitions currently assigned to this task instance
    pub assigned_partitions: AssignmentSet,
    /// Manually paused partitions, wildcards materialized
    pub manual_paused_partitions: EffectiveManualPauseSet,
    /// Partitions auto-paused for any reason
    pub auto_paused_partitions: BTreeSet<PartitionKey>,
    /// Partitions auto-paused after delivery failures
    pub auto_paused_on_error: BTreeSet<PartitionKey>,
    /// Partitions auto-paused on in-flight backpressure
    pub auto_paused_on_in_flight_messages: BTreeSet<PartitionKey>,
    /// Completed reconciliation passes since startup
    pub update_count: u64,
}

impl TaskDiagnostics {
    /// Check whether a partition is currently assigned
    pub fn is_assigned(&self, key: &PartitionKey) -> bool {
        self.assigned_partitions.contains(key)
    }

    /// Total number of manually paused partitions across topics
    pub fn manual_paused_count(&self) -> usize {
        self.manual_paused_partitions.values().map(BTreeSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_to_json() {
        let diagnostics = TaskDiagnostics {
            task: "mirror-1".to_string(),
            assigned_partitions: [PartitionKey::new("YummyPizza", 0)].into_iter().collect(),
            manual_paused_partitions: EffectiveManualPauseSet::new(),
            auto_paused_partitions: BTreeSet::new(),
            auto_paused_on_error: BTreeSet::new(),
            auto_paused_on_in_flight_messages: BTreeSet::new(),
            update_count: 1,
        };

        let json = serde_json::to_value(&diagnostics).unwrap();
        assert_eq!(json["task"], "mirror-1");
        assert_eq!(json["assigned_partitions"][0]["topic"], "YummyPizza");
        assert_eq!(json["update_count"], 1);
    }

    #[test]
    fn test_manual_paused_count() {
        let mut manual = EffectiveManualPauseSet::new();
        manual.insert("a".to_string(), [0, 1].into_iter().collect());
        manual.insert("b".to_string(), [0].into_iter().collect());

        let diagnostics = TaskDiagnostics {
            task: "t".to_string(),
            assigned_partitions: AssignmentSet::new(),
            manual_paused_partitions: manual,
            auto_paused_partitions: BTreeSet::new(),
            auto_paused_on_error: BTreeSet::new(),
            auto_paused_on_in_flight_messages: BTreeSet::new(),
            update_count: 0,
        };
        assert_eq!(diagnostics.manual_paused_count(), 3);
    }
}
