//! skein-mirror - Topic-mirroring connector task runtime for Skein
//!
//! A continuously-running task that mirrors records from pattern-matched
//! source topics into a destination sink, with dynamic per-partition flow
//! control. Three independently changing inputs are reconciled into one
//! authoritative pause set:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         MirrorTask                              │
//! │  poll → dispatch per-partition → delivery outcomes              │
//! ├───────────────┬──────────────────────┬──────────────────────────┤
//! │ manual pause  │ auto-pause tracker   │ assignment callbacks     │
//! │ configuration │ (send errors,        │ (consumer group          │
//! │ (metadata)    │  in-flight backlog)  │  rebalances)             │
//! ├───────────────┴──────────────────────┴──────────────────────────┤
//! │                    PartitionReconciler                          │
//! │  one lock, full recomputation, minimal pause/resume diff        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        SourceConsumer / RecordSink trait collaborators          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use skein_mirror::prelude::*;
//!
//! let stream = MirrorStream::new("pizzaStream", r"\w+Pizza");
//! let task = Arc::new(MirrorTask::new(
//!     "mirror-1",
//!     vec![stream],
//!     consumer,
//!     sink,
//!     Arc::new(MetricsCollector::new()),
//!     MirrorTaskConfig::default(),
//! )?);
//!
//! let runner = task.clone();
//! tokio::spawn(async move { runner.run().await });
//!
//! // later: pause YummyPizza partition 0 via stream metadata
//! let updated = stream.with_metadata(
//!     metadata_keys::PAUSED_PARTITIONS,
//!     r#"{"YummyPizza":["0"]}"#,
//! );
//! task.check_for_update(&[updated]).await?;
//!
//! task.stop();
//! assert!(task.await_stop(Duration::from_secs(30)).await);
//! ```

// Pause-state data model and reconciliation
pub mod auto_pause;
pub mod pause_config;
pub mod reconciler;

// Task runtime
pub mod config;
pub mod diagnostics;
pub mod group_id;
pub mod health;
pub mod task;

// Common types and errors
pub mod error;
pub mod types;

// Trait seams for external collaborators
pub mod traits;

// Re-export the primary API at crate root
pub use auto_pause::{AutoPauseEntry, AutoPauseTracker, PauseReason};
pub use config::MirrorTaskConfig;
pub use diagnostics::TaskDiagnostics;
pub use error::{MirrorError, Result, SinkError, TaskStatus};
pub use group_id::resolve_group_id;
pub use health::{serve_status, StatusConfig};
pub use pause_config::{EffectiveManualPauseSet, ManualPauseSpec, WILDCARD_TOKEN};
pub use reconciler::{PartitionReconciler, ReconcileTrigger};
pub use task::MirrorTask;
pub use traits::{
    metric_names, AssignmentSender, Label, MetricValue, Metrics, MetricsCollector,
    MetricsSnapshot, MockConsumer, MockRecordSink, NoopMetrics, RecordSink, SourceConsumer,
};
pub use types::{metadata_keys, AssignmentSet, MirrorStream, PartitionKey, SourceRecord};

// Re-export commonly used dependencies for embedders
pub use async_trait::async_trait;
pub use bytes::Bytes;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        async_trait, metadata_keys, metric_names, resolve_group_id, AssignmentSender,
        AssignmentSet, AutoPauseTracker, Bytes, EffectiveManualPauseSet, Label, ManualPauseSpec,
        Metrics, MetricsCollector, MirrorError, MirrorStream, MirrorTask, MirrorTaskConfig,
        NoopMetrics, PartitionKey, PartitionReconciler, PauseReason, ReconcileTrigger, RecordSink,
        Result, SinkError, SourceConsumer, SourceRecord, TaskDiagnostics, TaskStatus,
        WILDCARD_TOKEN,
    };

    // Testing helpers
    pub use crate::traits::testing::{poll_until, MockConsumer, MockRecordSink};
}
