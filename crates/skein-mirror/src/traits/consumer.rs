//! Source consumer trait
//!
//! The task treats the consumer as an opaque polling/fetching client with
//! per-partition flow control. Assignment changes arrive asynchronously on
//! the listener channel passed to [`SourceConsumer::subscribe`].

use crate::error::Result;
use crate::types::{AssignmentSet, PartitionKey, SourceRecord};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Channel on which the consumer delivers each new [`AssignmentSet`]
/// wholesale after a group rebalance.
pub type AssignmentSender = mpsc::UnboundedSender<AssignmentSet>;

/// A group-managed source consumer.
///
/// `pause`, `resume` and `seek` must be safe to invoke from a context other
/// than the polling loop; implementations serialize them internally against
/// `poll`.
#[async_trait]
pub trait SourceConsumer: Send + Sync {
    /// Subscribe to all topics matching `pattern`. The consumer sends the
    /// initial assignment, and every subsequent reassignment, on
    /// `assignments`.
    async fn subscribe(&self, pattern: &Regex, assignments: AssignmentSender) -> Result<()>;

    /// Fetch the next batch of records from assigned, non-paused
    /// partitions, waiting at most `timeout`. An empty batch is normal.
    async fn poll(&self, timeout: Duration) -> Result<Vec<SourceRecord>>;

    /// Suppress fetching from the given partitions until resumed
    async fn pause(&self, partitions: &AssignmentSet) -> Result<()>;

    /// Re-enable fetching from the given partitions
    async fn resume(&self, partitions: &AssignmentSet) -> Result<()>;

    /// Reposition the fetch cursor of a partition, so records from `offset`
    /// onward are delivered again by subsequent polls
    async fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<()>;

    /// Release the subscription and leave the consumer group
    async fn unsubscribe(&self) -> Result<()>;
}
