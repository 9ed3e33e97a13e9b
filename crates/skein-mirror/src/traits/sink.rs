//! Destination sink trait

use crate::error::SinkError;
use crate::types::SourceRecord;
use async_trait::async_trait;

/// An opaque publish sink for mirrored records.
///
/// A failed send is always treated as transient by the task: the owning
/// partition is auto-paused and the record retried later, preserving the
/// at-least-once contract.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Deliver one record to the destination
    async fn send(&self, record: &SourceRecord) -> std::result::Result<(), SinkError>;
}
