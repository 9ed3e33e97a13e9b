//! Mirror task run loop and lifecycle
//!
//! One loop drives polling and delivery dispatch. Deliveries are serialized
//! per partition by dedicated worker tasks (cross-partition parallelism,
//! in-order outcomes within a partition), and a separately scheduled timer
//! task drives periodic reconciliation for auto-resume eligibility.
//!
//! Lifecycle: `Created → Running → Stopping → Stopped`. A transient
//! delivery failure never stops the loop; only configuration or
//! subscription problems abort startup.

use crate::auto_pause::AutoPauseTracker;
use crate::config::MirrorTaskConfig;
use crate::diagnostics::TaskDiagnostics;
use crate::error::{MirrorError, Result, TaskStatus};
use crate::group_id;
use crate::pause_config::EffectiveManualPauseSet;
use crate::reconciler::{PartitionReconciler, ReconcileTrigger};
use crate::traits::consumer::SourceConsumer;
use crate::traits::metrics::{metric_names, Metrics};
use crate::traits::sink::RecordSink;
use crate::types::{metadata_keys, AssignmentSet, MirrorStream, PartitionKey, SourceRecord};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use validator::Validate;

/// Per-partition delivery lane: a worker draining a serial send queue.
///
/// `epoch` invalidates queued records after a rewind; `pending` counts
/// fetched-but-unacknowledged records for backpressure.
struct PartitionLane {
    tx: mpsc::UnboundedSender<(u64, SourceRecord)>,
    epoch: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

/// A continuously-running task mirroring pattern-matched source topics into
/// a destination sink with per-partition flow control.
pub struct MirrorTask {
    name: String,
    streams: Vec<MirrorStream>,
    group_id: String,
    source_pattern: String,
    config: MirrorTaskConfig,
    consumer: Arc<dyn SourceConsumer>,
    sink: Arc<dyn RecordSink>,
    metrics: Arc<dyn Metrics>,
    reconciler: Arc<PartitionReconciler>,
    status_tx: watch::Sender<TaskStatus>,
    status_rx: watch::Receiver<TaskStatus>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    records_mirrored: Arc<AtomicU64>,
    send_errors: Arc<AtomicU64>,
    polls: AtomicU64,
    rebalances: AtomicU64,
}

impl MirrorTask {
    /// Create a task for the given streams and collaborators.
    ///
    /// Fails fast on invalid tuning config or conflicting consumer group
    /// ids: configuration inconsistencies must prevent the task from ever
    /// reaching `Running`.
    pub fn new(
        name: impl Into<String>,
        streams: Vec<MirrorStream>,
        consumer: Arc<dyn SourceConsumer>,
        sink: Arc<dyn RecordSink>,
        metrics: Arc<dyn Metrics>,
        config: MirrorTaskConfig,
    ) -> Result<Self> {
        let name = name.into();
        config
            .validate()
            .map_err(|e| MirrorError::configuration(format!("invalid task config: {e}")))?;

        let group_id = group_id::resolve_group_id(&streams)?;
        let stream = streams
            .first()
            .ok_or_else(|| MirrorError::configuration("task has no streams bound"))?;
        let source_pattern = stream.source_pattern.clone();

        let tracker = AutoPauseTracker::new(
            config.pause_error_threshold,
            config.pause_error_retry(),
            config.pause_in_flight_retry(),
        );
        let reconciler = Arc::new(PartitionReconciler::new(
            name.clone(),
            stream.name.clone(),
            consumer.clone(),
            metrics.clone(),
            tracker,
        ));

        let (status_tx, status_rx) = watch::channel(TaskStatus::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            name,
            streams,
            group_id,
            source_pattern,
            config,
            consumer,
            sink,
            metrics,
            reconciler,
            status_tx,
            status_rx,
            shutdown_tx,
            shutdown_rx,
            records_mirrored: Arc::new(AtomicU64::new(0)),
            send_errors: Arc::new(AtomicU64::new(0)),
            polls: AtomicU64::new(0),
            rebalances: AtomicU64::new(0),
        })
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The consumer group id shared by all streams of this task
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Current lifecycle state
    pub fn status(&self) -> TaskStatus {
        *self.status_rx.borrow()
    }

    /// Records delivered to the destination
    pub fn records_mirrored(&self) -> u64 {
        self.records_mirrored.load(Ordering::Relaxed)
    }

    /// Failed send attempts observed
    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    /// Source poll operations performed
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Partition reassignments observed
    pub fn rebalances(&self) -> u64 {
        self.rebalances.load(Ordering::Relaxed)
    }

    /// Completed reconciliation passes since startup
    pub fn pause_update_count(&self) -> u64 {
        self.reconciler.update_count()
    }

    /// Current effective manual pause configuration
    pub async fn paused_partitions_config(&self) -> EffectiveManualPauseSet {
        self.reconciler.paused_partitions_config().await
    }

    /// Partitions currently auto-paused for any reason
    pub async fn auto_paused_partitions(&self) -> BTreeSet<PartitionKey> {
        self.reconciler.auto_paused_partitions().await
    }

    /// Read-only snapshot for the status endpoint
    pub async fn diagnostics(&self) -> TaskDiagnostics {
        self.reconciler.diagnostics().await
    }

    /// Consumer-group reassignment entry point. The run loop feeds channel
    /// events through here; embedders and tests may call it directly.
    pub async fn on_partitions_assigned(&self, assignment: AssignmentSet) -> Result<()> {
        self.rebalances.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment(metric_names::REBALANCES, 1);
        self.reconciler
            .handle(ReconcileTrigger::Reassigned(assignment))
            .await?;
        Ok(())
    }

    /// Compare the streams' manual pause spec against the last reconciled
    /// value and reconcile when it changed. An identical spec performs no
    /// pass, changes no metric or counter, and issues no consumer call.
    pub async fn check_for_update(&self, streams: &[MirrorStream]) -> Result<bool> {
        let raw = Self::raw_pause_spec(streams);
        self.reconciler
            .handle(ReconcileTrigger::ConfigChanged(raw))
            .await
    }

    /// Request a stop. Idempotent, non-blocking; the loop observes the
    /// signal at its next poll boundary.
    pub fn stop(&self) {
        self.status_tx.send_if_modified(|status| {
            if matches!(status, TaskStatus::Created | TaskStatus::Running) {
                *status = TaskStatus::Stopping;
                true
            } else {
                false
            }
        });
        let _ = self.shutdown_tx.send(true);
    }

    /// Block until the task reaches `Stopped` or the timeout elapses.
    /// Returns true on graceful shutdown, false on timeout.
    pub async fn await_stop(&self, timeout: Duration) -> bool {
        let mut status_rx = self.status_rx.clone();
        let outcome =
            tokio::time::timeout(timeout, status_rx.wait_for(|s| s.is_stopped())).await;
        matches!(outcome, Ok(Ok(_)))
    }

    /// Run the poll/delivery loop until stopped.
    ///
    /// Subscribes to the source pattern, performs the initial
    /// reconciliation pass, spawns the periodic reconcile timer, then polls
    /// and dispatches until a stop request arrives.
    pub async fn run(&self) -> Result<()> {
        match self.status() {
            TaskStatus::Created => {}
            TaskStatus::Stopping => {
                // stopped before it ever started; settle the lifecycle
                let _ = self.status_tx.send(TaskStatus::Stopped);
                return Ok(());
            }
            status => {
                return Err(MirrorError::state(format!(
                    "cannot run task in state {status}"
                )));
            }
        }

        let pattern = Regex::new(&self.source_pattern).map_err(|e| {
            MirrorError::configuration(format!(
                "invalid source pattern '{}': {e}",
                self.source_pattern
            ))
        })?;

        let (assignment_tx, mut assignment_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.consumer.subscribe(&pattern, assignment_tx).await {
            error!(task = %self.name, error = %e, "source subscription failed");
            let _ = self.status_tx.send(TaskStatus::Stopped);
            return Err(MirrorError::subscription(e.to_string()));
        }

        // initial pass: reconcile whatever pause spec the streams carry now
        self.reconciler
            .handle(ReconcileTrigger::ConfigChanged(Self::raw_pause_spec(
                &self.streams,
            )))
            .await?;

        let timer = self.spawn_reconcile_timer();
        let _ = self.status_tx.send(TaskStatus::Running);
        info!(
            task = %self.name,
            group_id = %self.group_id,
            pattern = %self.source_pattern,
            "mirror task running"
        );

        let mut lanes: HashMap<PartitionKey, PartitionLane> = HashMap::new();

        while !*self.shutdown_rx.borrow() {
            // reassignments first, so wildcards resolve against the
            // assignment captured for this pass
            while let Ok(assignment) = assignment_rx.try_recv() {
                lanes.retain(|key, lane| {
                    let keep = assignment.contains(key);
                    if !keep {
                        // invalidate queued records of revoked partitions
                        lane.epoch.fetch_add(1, Ordering::Relaxed);
                    }
                    keep
                });
                if let Err(e) = self.on_partitions_assigned(assignment).await {
                    warn!(task = %self.name, error = %e, "reassignment reconciliation failed");
                }
            }

            let batch = match self.consumer.poll(self.config.poll_timeout()).await {
                Ok(batch) => batch,
                Err(e) if e.is_shutdown() => break,
                Err(e) => {
                    warn!(task = %self.name, error = %e, "poll failed");
                    tokio::time::sleep(self.config.poll_timeout()).await;
                    continue;
                }
            };
            self.polls.fetch_add(1, Ordering::Relaxed);
            self.metrics.increment(metric_names::POLLS, 1);

            for record in batch {
                self.dispatch(record, &mut lanes).await;
            }
        }

        // drop delivery lanes so workers drain and exit
        lanes.clear();
        timer.abort();
        if let Err(e) = self.consumer.unsubscribe().await {
            warn!(task = %self.name, error = %e, "unsubscribe failed during shutdown");
        }
        let _ = self.status_tx.send(TaskStatus::Stopped);
        info!(
            task = %self.name,
            records = self.records_mirrored(),
            "mirror task stopped"
        );
        Ok(())
    }

    /// Enqueue a record on its partition's delivery lane, creating the lane
    /// on first use, and signal backpressure when the lane backs up.
    async fn dispatch(&self, record: SourceRecord, lanes: &mut HashMap<PartitionKey, PartitionLane>) {
        let key = record.partition_key();
        let lane = lanes
            .entry(key.clone())
            .or_insert_with(|| self.spawn_partition_lane(key.clone()));

        let pending = lane.pending.fetch_add(1, Ordering::Relaxed) + 1;
        let epoch = lane.epoch.load(Ordering::Relaxed);
        if lane.tx.send((epoch, record)).is_err() {
            // worker gone (shutdown path); nothing to deliver to
            lane.pending.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        let limit = self.config.max_in_flight_per_partition;
        if limit > 0 && pending > limit {
            self.reconciler.record_in_flight_excess(&key).await;
        }
    }

    /// Spawn the serial delivery worker for one partition
    fn spawn_partition_lane(&self, key: PartitionKey) -> PartitionLane {
        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, SourceRecord)>();
        let epoch = Arc::new(AtomicU64::new(0));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = PartitionWorker {
            key,
            epoch: epoch.clone(),
            pending: pending.clone(),
            sink: self.sink.clone(),
            consumer: self.consumer.clone(),
            reconciler: self.reconciler.clone(),
            metrics: self.metrics.clone(),
            records_mirrored: self.records_mirrored.clone(),
            send_errors: self.send_errors.clone(),
            in_flight_limit: self.config.max_in_flight_per_partition,
        };
        tokio::spawn(async move {
            while let Some((tag, record)) = rx.recv().await {
                worker.deliver(tag, record).await;
            }
        });

        PartitionLane { tx, epoch, pending }
    }

    fn raw_pause_spec(streams: &[MirrorStream]) -> String {
        streams
            .first()
            .and_then(|s| s.metadata.get(metadata_keys::PAUSED_PARTITIONS))
            .cloned()
            .unwrap_or_default()
    }

    /// Spawn the independently scheduled periodic reconciliation task
    fn spawn_reconcile_timer(&self) -> tokio::task::JoinHandle<()> {
        let reconciler = self.reconciler.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let interval = self.config.reconcile_interval();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => break,
                    _ = tick.tick() => {
                        if let Err(e) = reconciler.handle(ReconcileTrigger::TimerTick).await {
                            warn!(error = %e, "periodic reconciliation failed");
                        }
                    }
                }
            }
        })
    }
}

/// State captured by a partition's delivery worker
struct PartitionWorker {
    key: PartitionKey,
    epoch: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
    sink: Arc<dyn RecordSink>,
    consumer: Arc<dyn SourceConsumer>,
    reconciler: Arc<PartitionReconciler>,
    metrics: Arc<dyn Metrics>,
    records_mirrored: Arc<AtomicU64>,
    send_errors: Arc<AtomicU64>,
    in_flight_limit: usize,
}

impl PartitionWorker {
    async fn deliver(&self, tag: u64, record: SourceRecord) {
        if tag < self.epoch.load(Ordering::Relaxed) {
            // superseded by a rewind; the record will be re-fetched
            self.finish_one().await;
            return;
        }

        match self.sink.send(&record).await {
            Ok(()) => {
                self.records_mirrored.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment(metric_names::RECORDS_MIRRORED, 1);
                self.reconciler.record_send_success(&self.key).await;
                self.finish_one().await;
            }
            Err(e) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.increment(metric_names::SEND_ERRORS, 1);
                warn!(
                    partition = %self.key,
                    offset = record.offset,
                    error = %e,
                    "delivery failed"
                );
                // invalidate everything queued behind the failure, then
                // rewind so the failed record is re-fetched after resume
                self.epoch.fetch_add(1, Ordering::Relaxed);
                self.reconciler.record_send_failure(&self.key).await;
                if let Err(seek_err) = self.consumer.seek(&self.key, record.offset).await {
                    warn!(partition = %self.key, error = %seek_err, "rewind seek failed");
                }
                self.finish_one().await;
            }
        }
    }

    async fn finish_one(&self) {
        let remaining = self.pending.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        if self.in_flight_limit > 0 && remaining <= self.in_flight_limit {
            self.reconciler.record_in_flight_drained(&self.key).await;
        }
    }
}
