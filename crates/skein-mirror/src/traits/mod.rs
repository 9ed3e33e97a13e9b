//! Trait seams for the mirror task's external collaborators
//!
//! The wire-level consumer and producer clients stay outside this crate;
//! the task only sees these traits. `testing` provides in-memory
//! implementations for exercising the task without a broker.

pub mod consumer;
pub mod metrics;
pub mod sink;
pub mod testing;

pub use consumer::{AssignmentSender, SourceConsumer};
pub use metrics::{metric_names, Label, MetricValue, Metrics, MetricsCollector, MetricsSnapshot, NoopMetrics};
pub use sink::RecordSink;
pub use testing::{poll_until, MockConsumer, MockRecordSink};
