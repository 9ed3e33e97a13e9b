//! Partition pause-state reconciliation
//!
//! The reconciler is the single source of truth for which partitions are
//! paused. All inputs — manual configuration, auto-pause signals, partition
//! reassignment, the periodic timer — funnel into one mutual-exclusion
//! domain, and every pass recomputes the effective pause set from scratch
//! rather than patching it incrementally. Full recomputation is cheap at
//! partition-count scale and immune to partial-update drift.

use crate::auto_pause::{AutoPauseTracker, PauseReason};
use crate::diagnostics::TaskDiagnostics;
use crate::error::Result;
use crate::pause_config::{self, EffectiveManualPauseSet, ManualPauseSpec};
use crate::traits::consumer::SourceConsumer;
use crate::traits::metrics::{metric_names, Label, Metrics};
use crate::types::{AssignmentSet, PartitionKey};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What triggered a reconciliation request
#[derive(Debug, Clone)]
pub enum ReconcileTrigger {
    /// The consumer group assigned a new partition set to this task
    Reassigned(AssignmentSet),
    /// An external update check supplied the current raw pause spec
    ConfigChanged(String),
    /// The periodic timer fired
    TimerTick,
}

/// Pause-state data model, guarded by the reconciler's mutex.
///
/// Assignment and the effective manual set are immutable snapshots behind
/// `Arc`s swapped wholesale, so diagnostics readers never observe a
/// partially updated view.
struct PauseState {
    assignment: Arc<AssignmentSet>,
    /// Last accepted spec with wildcards intact, for re-expansion on
    /// reassignment
    spec: ManualPauseSpec,
    manual: Arc<EffectiveManualPauseSet>,
    auto: AutoPauseTracker,
    /// Pause set most recently applied to the consumer
    applied: BTreeSet<PartitionKey>,
    reconciled_once: bool,
}

/// Merges manual config, auto-pause state and the current assignment into
/// one effective pause set, and applies it to the consumer.
pub struct PartitionReconciler {
    task_name: String,
    stream_name: String,
    consumer: Arc<dyn SourceConsumer>,
    metrics: Arc<dyn Metrics>,
    state: Mutex<PauseState>,
    update_count: AtomicU64,
}

impl PartitionReconciler {
    /// Create a reconciler for one task/stream pair
    pub fn new(
        task_name: impl Into<String>,
        stream_name: impl Into<String>,
        consumer: Arc<dyn SourceConsumer>,
        metrics: Arc<dyn Metrics>,
        tracker: AutoPauseTracker,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            stream_name: stream_name.into(),
            consumer,
            metrics,
            state: Mutex::new(PauseState {
                assignment: Arc::new(AssignmentSet::new()),
                spec: ManualPauseSpec::new(),
                manual: Arc::new(EffectiveManualPauseSet::new()),
                auto: tracker,
                applied: BTreeSet::new(),
                reconciled_once: false,
            }),
            update_count: AtomicU64::new(0),
        }
    }

    /// Completed reconciliation passes since startup
    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::Relaxed)
    }

    /// Handle a reconciliation trigger. Returns true when a pass was
    /// performed; an identical config or an idle timer tick is a no-op with
    /// no counter, metric, or consumer-call side effects.
    pub async fn handle(&self, trigger: ReconcileTrigger) -> Result<bool> {
        let mut state = self.state.lock().await;
        match trigger {
            ReconcileTrigger::Reassigned(assignment) => {
                let assignment = Arc::new(assignment);
                info!(
                    task = %self.task_name,
                    partitions = assignment.len(),
                    "partition assignment replaced"
                );
                state.auto.retain_assigned(&assignment);
                state.applied.retain(|key| assignment.contains(key));
                // wildcards re-expand against the assignment of this pass
                state.manual = Arc::new(pause_config::resolve(&state.spec, &assignment));
                state.assignment = assignment;
                self.run_pass(&mut state).await;
                Ok(true)
            }
            ReconcileTrigger::ConfigChanged(raw) => {
                let spec = pause_config::parse_spec(&raw);
                let resolved = pause_config::resolve(&spec, &state.assignment);
                if state.reconciled_once && resolved == *state.manual {
                    // same effective set: keep the latest wildcard structure
                    // for future re-expansion, but perform no pass
                    state.spec = spec;
                    debug!(task = %self.task_name, "pause configuration unchanged, skipping pass");
                    return Ok(false);
                }
                info!(
                    task = %self.task_name,
                    topics = resolved.len(),
                    "manual pause configuration updated"
                );
                state.spec = spec;
                state.manual = Arc::new(resolved);
                self.run_pass(&mut state).await;
                Ok(true)
            }
            ReconcileTrigger::TimerTick => {
                let expired = state.auto.expire_eligible(Instant::now());
                if expired.is_empty() {
                    return Ok(false);
                }
                for (key, reason) in &expired {
                    info!(
                        partition = %key,
                        reason = %reason,
                        "retry interval elapsed, partition eligible for resume probe"
                    );
                }
                self.run_pass(&mut state).await;
                Ok(true)
            }
        }
    }

    /// Route a delivery failure to the tracker. Runs a pass (pausing the
    /// partition) when the failure crossed the threshold; returns true in
    /// that case.
    pub async fn record_send_failure(&self, key: &PartitionKey) -> bool {
        let mut state = self.state.lock().await;
        if !state.assignment.contains(key) {
            return false;
        }
        if !state.auto.record_send_failure(key.clone(), Instant::now()) {
            return false;
        }
        warn!(partition = %key, "auto-pausing partition after delivery failure");
        self.run_pass(&mut state).await;
        true
    }

    /// Route a delivery success to the tracker: the resume probe. Runs a
    /// pass when a send-error entry was cleared.
    pub async fn record_send_success(&self, key: &PartitionKey) -> bool {
        let mut state = self.state.lock().await;
        if !state.auto.record_send_success(key) {
            return false;
        }
        info!(partition = %key, "resume probe succeeded, clearing auto-pause");
        self.run_pass(&mut state).await;
        true
    }

    /// Signal that unacknowledged sends for a partition exceeded the
    /// configured limit
    pub async fn record_in_flight_excess(&self, key: &PartitionKey) -> bool {
        let mut state = self.state.lock().await;
        if !state.assignment.contains(key) {
            return false;
        }
        if !state.auto.record_in_flight_excess(key.clone(), Instant::now()) {
            return false;
        }
        warn!(partition = %key, "auto-pausing partition on in-flight backpressure");
        self.run_pass(&mut state).await;
        true
    }

    /// Signal that unacknowledged sends for a partition drained below the
    /// configured limit
    pub async fn record_in_flight_drained(&self, key: &PartitionKey) -> bool {
        let mut state = self.state.lock().await;
        if !state.auto.record_in_flight_drained(key) {
            return false;
        }
        debug!(partition = %key, "in-flight backlog drained, clearing auto-pause");
        self.run_pass(&mut state).await;
        true
    }

    /// Current effective manual pause set
    pub async fn paused_partitions_config(&self) -> EffectiveManualPauseSet {
        let state = self.state.lock().await;
        (*state.manual).clone()
    }

    /// Partitions currently auto-paused for any reason
    pub async fn auto_paused_partitions(&self) -> BTreeSet<PartitionKey> {
        let state = self.state.lock().await;
        state.auto.auto_paused()
    }

    /// Current assignment snapshot
    pub async fn assignment(&self) -> AssignmentSet {
        let state = self.state.lock().await;
        (*state.assignment).clone()
    }

    /// Build the diagnostics snapshot from one locked view
    pub async fn diagnostics(&self) -> TaskDiagnostics {
        let state = self.state.lock().await;
        TaskDiagnostics {
            task: self.task_name.clone(),
            assigned_partitions: (*state.assignment).clone(),
            manual_paused_partitions: (*state.manual).clone(),
            auto_paused_partitions: state.auto.auto_paused(),
            auto_paused_on_error: state.auto.paused_for(PauseReason::SendError),
            auto_paused_on_in_flight_messages: state.auto.paused_for(PauseReason::InFlightMessages),
            update_count: self.update_count(),
        }
    }

    /// One reconciliation pass: recompute the effective pause set, apply the
    /// minimal diff to the consumer, publish gauges, bump the counter.
    async fn run_pass(&self, state: &mut PauseState) {
        // a manual pause supersedes auto bookkeeping for covered partitions
        for key in state.auto.drop_covered(&state.manual) {
            debug!(partition = %key, "auto-pause entry covered by manual pause, dropped");
        }

        let mut effective: BTreeSet<PartitionKey> = state.auto.auto_paused();
        for (topic, ids) in state.manual.iter() {
            for id in ids {
                effective.insert(PartitionKey::new(topic.clone(), *id));
            }
        }

        // only assigned partitions can be paused on the live consumer
        let target: BTreeSet<PartitionKey> = effective
            .intersection(&state.assignment)
            .cloned()
            .collect();

        let to_pause: AssignmentSet = target.difference(&state.applied).cloned().collect();
        let to_resume: AssignmentSet = state.applied.difference(&target).cloned().collect();

        if !to_pause.is_empty() {
            debug!(partitions = ?to_pause, "pausing partitions");
            if let Err(e) = self.consumer.pause(&to_pause).await {
                warn!(error = %e, "consumer pause call failed");
            }
        }
        if !to_resume.is_empty() {
            debug!(partitions = ?to_resume, "resuming partitions");
            if let Err(e) = self.consumer.resume(&to_resume).await {
                warn!(error = %e, "consumer resume call failed");
            }
        }
        state.applied = target;

        let labels = [
            Label::new("task", &self.task_name),
            Label::new("stream", &self.stream_name),
        ];
        self.metrics.gauge_with_labels(
            metric_names::NUM_AUTO_PAUSED_PARTITIONS_ON_ERROR,
            state.auto.count(PauseReason::SendError) as i64,
            &labels,
        );
        self.metrics.gauge_with_labels(
            metric_names::NUM_AUTO_PAUSED_PARTITIONS_ON_IN_FLIGHT_MESSAGES,
            state.auto.count(PauseReason::InFlightMessages) as i64,
            &labels,
        );
        let config_paused: usize = state.manual.values().map(BTreeSet::len).sum();
        self.metrics.gauge_with_labels(
            metric_names::NUM_CONFIG_PAUSED_PARTITIONS,
            config_paused as i64,
            &labels,
        );

        state.reconciled_once = true;
        let passes = self.update_count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            task = %self.task_name,
            passes,
            paused = state.applied.len(),
            "reconciliation pass complete"
        );
    }
}
