//! Auto-pause bookkeeping for failing or backed-up partitions
//!
//! A partition may carry one entry per reason at a time. Entries are
//! created by delivery outcomes and backpressure signals, and removed by a
//! successful resume probe, by retry-interval expiry, by a covering manual
//! pause, or when the partition is reassigned away.

use crate::pause_config::EffectiveManualPauseSet;
use crate::types::{AssignmentSet, PartitionKey};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

/// Why a partition was auto-paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PauseReason {
    /// A delivery attempt to the destination failed
    SendError,
    /// Too many unacknowledged sends outstanding for the partition
    InFlightMessages,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendError => write!(f, "send-error"),
            Self::InFlightMessages => write!(f, "in-flight-messages"),
        }
    }
}

/// One active auto-pause, with its own retry timer
#[derive(Debug, Clone)]
pub struct AutoPauseEntry {
    /// When the pause was recorded
    pub paused_at: Instant,
    /// How long to wait before the partition becomes eligible for a resume
    /// probe
    pub retry_after: Duration,
}

impl AutoPauseEntry {
    /// Check whether the retry interval has elapsed
    pub fn is_retry_eligible(&self, now: Instant) -> bool {
        now.duration_since(self.paused_at) >= self.retry_after
    }
}

/// Tracks auto-paused partitions per reason.
///
/// Not internally synchronized; the reconciler owns it inside its single
/// mutual-exclusion domain.
#[derive(Debug)]
pub struct AutoPauseTracker {
    entries: HashMap<PartitionKey, BTreeMap<PauseReason, AutoPauseEntry>>,
    /// Consecutive delivery failures per partition; survives entry expiry so
    /// a failed resume probe re-pauses immediately
    failure_streaks: HashMap<PartitionKey, u32>,
    error_threshold: u32,
    error_retry: Duration,
    in_flight_retry: Duration,
}

impl AutoPauseTracker {
    /// Create a tracker with the given failure threshold and retry intervals
    pub fn new(error_threshold: u32, error_retry: Duration, in_flight_retry: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            failure_streaks: HashMap::new(),
            error_threshold: error_threshold.max(1),
            error_retry,
            in_flight_retry,
        }
    }

    /// Record a delivery failure. Returns true when this failure crossed the
    /// threshold and created a new send-error entry; an existing entry's
    /// timer is left untouched.
    pub fn record_send_failure(&mut self, key: PartitionKey, now: Instant) -> bool {
        let streak = self.failure_streaks.entry(key.clone()).or_insert(0);
        *streak = streak.saturating_add(1);
        if *streak < self.error_threshold {
            return false;
        }

        let reasons = self.entries.entry(key).or_default();
        if reasons.contains_key(&PauseReason::SendError) {
            return false;
        }
        reasons.insert(
            PauseReason::SendError,
            AutoPauseEntry {
                paused_at: now,
                retry_after: self.error_retry,
            },
        );
        true
    }

    /// Record a delivery success: the implicit resume probe. Resets the
    /// failure streak and returns true if a send-error entry was cleared.
    pub fn record_send_success(&mut self, key: &PartitionKey) -> bool {
        self.failure_streaks.remove(key);
        self.remove_entry(key, PauseReason::SendError)
    }

    /// Record that in-flight sends for a partition exceeded the threshold.
    /// Returns true if a new entry was created.
    pub fn record_in_flight_excess(&mut self, key: PartitionKey, now: Instant) -> bool {
        let reasons = self.entries.entry(key).or_default();
        if reasons.contains_key(&PauseReason::InFlightMessages) {
            return false;
        }
        reasons.insert(
            PauseReason::InFlightMessages,
            AutoPauseEntry {
                paused_at: now,
                retry_after: self.in_flight_retry,
            },
        );
        true
    }

    /// Record that in-flight sends drained below the threshold. Returns
    /// true if an entry was cleared.
    pub fn record_in_flight_drained(&mut self, key: &PartitionKey) -> bool {
        self.remove_entry(key, PauseReason::InFlightMessages)
    }

    /// Remove entries whose retry interval has elapsed, making their
    /// partitions eligible for a resume probe on the next pass. The failure
    /// streak is kept, so a probe that fails again re-pauses immediately.
    pub fn expire_eligible(&mut self, now: Instant) -> Vec<(PartitionKey, PauseReason)> {
        let mut expired = Vec::new();
        self.entries.retain(|key, reasons| {
            reasons.retain(|reason, entry| {
                if entry.is_retry_eligible(now) {
                    expired.push((key.clone(), *reason));
                    false
                } else {
                    true
                }
            });
            !reasons.is_empty()
        });
        expired
    }

    /// Drop all state for partitions no longer assigned to this task
    pub fn retain_assigned(&mut self, assignment: &AssignmentSet) {
        self.entries.retain(|key, _| assignment.contains(key));
        self.failure_streaks.retain(|key, _| assignment.contains(key));
    }

    /// Drop entries redundantly covered by a manual pause. The partition is
    /// not polled regardless, and manual resume is the operator's explicit
    /// signal to probe again.
    pub fn drop_covered(&mut self, manual: &EffectiveManualPauseSet) -> Vec<PartitionKey> {
        let mut dropped = Vec::new();
        self.entries.retain(|key, _| {
            let covered = manual
                .get(&key.topic)
                .is_some_and(|ids| ids.contains(&key.partition));
            if covered {
                dropped.push(key.clone());
            }
            !covered
        });
        dropped
    }

    /// All partitions with at least one active entry
    pub fn auto_paused(&self) -> BTreeSet<PartitionKey> {
        self.entries.keys().cloned().collect()
    }

    /// Partitions paused for a specific reason
    pub fn paused_for(&self, reason: PauseReason) -> BTreeSet<PartitionKey> {
        self.entries
            .iter()
            .filter(|(_, reasons)| reasons.contains_key(&reason))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Number of partitions paused for a specific reason
    pub fn count(&self, reason: PauseReason) -> usize {
        self.entries
            .values()
            .filter(|reasons| reasons.contains_key(&reason))
            .count()
    }

    /// Check whether a partition carries any active entry
    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Check whether no partition is auto-paused
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_entry(&mut self, key: &PartitionKey, reason: PauseReason) -> bool {
        if let Some(reasons) = self.entries.get_mut(key) {
            let removed = reasons.remove(&reason).is_some();
            if reasons.is_empty() {
                self.entries.remove(key);
            }
            removed
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tracker(threshold: u32) -> AutoPauseTracker {
        AutoPauseTracker::new(
            threshold,
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
    }

    fn key(topic: &str, partition: i32) -> PartitionKey {
        PartitionKey::new(topic, partition)
    }

    #[test]
    fn test_pauses_after_threshold() {
        let mut t = tracker(3);
        let now = Instant::now();
        assert!(!t.record_send_failure(key("a", 0), now));
        assert!(!t.record_send_failure(key("a", 0), now));
        assert!(t.record_send_failure(key("a", 0), now));
        assert!(t.contains(&key("a", 0)));
        assert_eq!(t.count(PauseReason::SendError), 1);
    }

    #[test]
    fn test_repeat_failure_leaves_timer_untouched() {
        let mut t = tracker(1);
        let start = Instant::now();
        assert!(t.record_send_failure(key("a", 0), start));
        // second failure while paused does not reset the clock
        assert!(!t.record_send_failure(key("a", 0), start + Duration::from_millis(90)));
        let expired = t.expire_eligible(start + Duration::from_millis(100));
        assert_eq!(expired, vec![(key("a", 0), PauseReason::SendError)]);
    }

    #[test]
    fn test_success_clears_entry_and_streak() {
        let mut t = tracker(2);
        let now = Instant::now();
        t.record_send_failure(key("a", 0), now);
        t.record_send_failure(key("a", 0), now);
        assert!(t.contains(&key("a", 0)));
        assert!(t.record_send_success(&key("a", 0)));
        assert!(t.is_empty());
        // streak reset: one failure is below the threshold again
        assert!(!t.record_send_failure(key("a", 0), now));
    }

    #[test]
    fn test_failed_probe_repauses_immediately() {
        let mut t = tracker(3);
        let start = Instant::now();
        for _ in 0..3 {
            t.record_send_failure(key("a", 0), start);
        }
        t.expire_eligible(start + Duration::from_millis(100));
        assert!(t.is_empty());
        // the streak survived expiry, so one more failure re-pauses
        assert!(t.record_send_failure(key("a", 0), start + Duration::from_millis(110)));
    }

    #[test]
    fn test_both_reasons_coexist() {
        let mut t = tracker(1);
        let now = Instant::now();
        t.record_send_failure(key("a", 0), now);
        t.record_in_flight_excess(key("a", 0), now);
        assert_eq!(t.count(PauseReason::SendError), 1);
        assert_eq!(t.count(PauseReason::InFlightMessages), 1);
        assert_eq!(t.auto_paused().len(), 1);

        // clearing one reason keeps the partition paused for the other
        assert!(t.record_in_flight_drained(&key("a", 0)));
        assert!(t.contains(&key("a", 0)));
    }

    #[test]
    fn test_retain_assigned_drops_stale_entries() {
        let mut t = tracker(1);
        let now = Instant::now();
        t.record_send_failure(key("a", 0), now);
        t.record_send_failure(key("b", 0), now);
        let assignment: AssignmentSet = [key("b", 0)].into_iter().collect();
        t.retain_assigned(&assignment);
        assert!(!t.contains(&key("a", 0)));
        assert!(t.contains(&key("b", 0)));
    }

    #[test]
    fn test_drop_covered_by_manual_pause() {
        let mut t = tracker(1);
        let now = Instant::now();
        t.record_send_failure(key("a", 0), now);
        t.record_send_failure(key("b", 0), now);

        let mut manual = EffectiveManualPauseSet::new();
        manual.insert("a".to_string(), [0].into_iter().collect());

        let dropped = t.drop_covered(&manual);
        assert_eq!(dropped, vec![key("a", 0)]);
        assert!(!t.contains(&key("a", 0)));
        assert!(t.contains(&key("b", 0)));
    }

    #[test]
    fn test_expire_only_elapsed_reasons() {
        let mut t = AutoPauseTracker::new(1, Duration::from_millis(50), Duration::from_secs(60));
        let start = Instant::now();
        t.record_send_failure(key("a", 0), start);
        t.record_in_flight_excess(key("a", 0), start);

        let expired: BTreeMap<_, _> = t
            .expire_eligible(start + Duration::from_millis(60))
            .into_iter()
            .collect();
        assert_eq!(expired.get(&key("a", 0)), Some(&PauseReason::SendError));
        // still paused on in-flight
        assert!(t.contains(&key("a", 0)));
    }
}
