//! Testing utilities
//!
//! In-memory consumer and sink implementations for exercising the mirror
//! task without a broker, plus a polling helper for eventually-consistent
//! assertions.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = Arc::new(MockConsumer::new().with_topic("YummyPizza", 1));
//! let sink = Arc::new(MockRecordSink::new());
//! consumer.produce("YummyPizza", Some("key-0"), "event-0");
//! // ... run a MirrorTask against them ...
//! assert!(poll_until(|| { let s = sink.clone(); async move { s.written_count() == 1 } },
//!     Duration::from_secs(5)).await);
//! ```

use crate::error::{MirrorError, Result, SinkError};
use crate::traits::consumer::{AssignmentSender, SourceConsumer};
use crate::traits::sink::RecordSink;
use crate::types::{AssignmentSet, PartitionKey, SourceRecord};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::time::{Duration, Instant};

// ============================================================================
// Mock Consumer
// ============================================================================

#[derive(Default)]
struct MockConsumerState {
    /// Per-partition record log; offset = index
    logs: BTreeMap<PartitionKey, Vec<SourceRecord>>,
    /// Next offset to fetch per partition
    cursors: BTreeMap<PartitionKey, i64>,
    paused: BTreeSet<PartitionKey>,
    assignment: AssignmentSet,
    pattern: Option<Regex>,
    assignment_tx: Option<AssignmentSender>,
    pause_calls: u64,
    resume_calls: u64,
}

/// A scripted in-memory source consumer.
///
/// Topics are declared up front (or created on first produce); `subscribe`
/// assigns every partition of every pattern-matching topic and announces it
/// on the listener channel. `pause`/`resume`/`seek` behave like a real
/// group consumer: paused partitions are skipped by `poll`, `seek` rewinds
/// the fetch cursor.
pub struct MockConsumer {
    state: Mutex<MockConsumerState>,
}

impl Default for MockConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConsumer {
    /// Create an empty mock consumer
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockConsumerState::default()),
        }
    }

    /// Declare a topic with the given partition count (builder-style)
    pub fn with_topic(self, topic: impl Into<String>, partitions: i32) -> Self {
        self.add_topic(topic, partitions);
        self
    }

    /// Declare a topic with the given partition count
    pub fn add_topic(&self, topic: impl Into<String>, partitions: i32) {
        let topic = topic.into();
        let mut state = self.state.lock();
        for partition in 0..partitions {
            let key = PartitionKey::new(topic.clone(), partition);
            state.logs.entry(key.clone()).or_default();
            state.cursors.entry(key).or_insert(0);
        }
    }

    /// Append a record to partition 0 of a topic
    pub fn produce(&self, topic: impl Into<String>, key: Option<&str>, value: &str) {
        self.produce_to(topic, 0, key, value);
    }

    /// Append a record to a specific partition
    pub fn produce_to(
        &self,
        topic: impl Into<String>,
        partition: i32,
        key: Option<&str>,
        value: &str,
    ) {
        let topic = topic.into();
        let partition_key = PartitionKey::new(topic.clone(), partition);
        let mut state = self.state.lock();
        let log = state.logs.entry(partition_key.clone()).or_default();
        let offset = log.len() as i64;
        log.push(SourceRecord::new(
            topic,
            partition,
            offset,
            key.map(|k| Bytes::copy_from_slice(k.as_bytes())),
            Bytes::copy_from_slice(value.as_bytes()),
        ));
        state.cursors.entry(partition_key).or_insert(0);
    }

    /// Recompute the assignment from the subscribed pattern and announce it
    /// on the listener channel, simulating a group rebalance
    pub fn rebalance(&self) {
        let mut state = self.state.lock();
        let Some(pattern) = state.pattern.clone() else {
            return;
        };
        let assignment: AssignmentSet = state
            .logs
            .keys()
            .filter(|key| pattern.is_match(&key.topic))
            .cloned()
            .collect();
        state.assignment = assignment.clone();
        state.paused.retain(|key| assignment.contains(key));
        if let Some(tx) = &state.assignment_tx {
            let _ = tx.send(assignment);
        }
    }

    /// Currently paused partitions
    pub fn paused_partitions(&self) -> BTreeSet<PartitionKey> {
        self.state.lock().paused.clone()
    }

    /// Check whether one partition is paused
    pub fn is_paused(&self, key: &PartitionKey) -> bool {
        self.state.lock().paused.contains(key)
    }

    /// Number of pause directives received
    pub fn pause_calls(&self) -> u64 {
        self.state.lock().pause_calls
    }

    /// Number of resume directives received
    pub fn resume_calls(&self) -> u64 {
        self.state.lock().resume_calls
    }

    fn take_ready(&self) -> Vec<SourceRecord> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut batch = Vec::new();
        for key in &state.assignment {
            if state.paused.contains(key) {
                continue;
            }
            let Some(log) = state.logs.get(key) else {
                continue;
            };
            let cursor = state.cursors.get(key).copied().unwrap_or(0).max(0) as usize;
            if cursor >= log.len() {
                continue;
            }
            batch.extend(log[cursor..].iter().cloned());
            state.cursors.insert(key.clone(), log.len() as i64);
        }
        batch
    }
}

#[async_trait]
impl SourceConsumer for MockConsumer {
    async fn subscribe(&self, pattern: &Regex, assignments: AssignmentSender) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.pattern = Some(pattern.clone());
            state.assignment_tx = Some(assignments);
        }
        self.rebalance();
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Vec<SourceRecord>> {
        let batch = self.take_ready();
        if !batch.is_empty() {
            return Ok(batch);
        }
        tokio::time::sleep(timeout).await;
        Ok(self.take_ready())
    }

    async fn pause(&self, partitions: &AssignmentSet) -> Result<()> {
        let mut state = self.state.lock();
        state.pause_calls += 1;
        state.paused.extend(partitions.iter().cloned());
        Ok(())
    }

    async fn resume(&self, partitions: &AssignmentSet) -> Result<()> {
        let mut state = self.state.lock();
        state.resume_calls += 1;
        for key in partitions {
            state.paused.remove(key);
        }
        Ok(())
    }

    async fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.logs.contains_key(partition) {
            return Err(MirrorError::consumer(format!(
                "seek on unknown partition {partition}"
            )));
        }
        state.cursors.insert(partition.clone(), offset.max(0));
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.pattern = None;
        state.assignment_tx = None;
        state.assignment.clear();
        Ok(())
    }
}

// ============================================================================
// Mock Record Sink
// ============================================================================

type FailPredicate = Box<dyn Fn(&SourceRecord) -> bool + Send + Sync>;

struct MockSinkState {
    written: Vec<SourceRecord>,
    fail_when: Option<FailPredicate>,
}

/// An in-memory destination sink with a runtime-swappable failure
/// condition, mirroring how flaky destinations are simulated in tests.
pub struct MockRecordSink {
    state: Mutex<MockSinkState>,
    latency: Mutex<Duration>,
}

impl Default for MockRecordSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRecordSink {
    /// Create a sink that accepts everything
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockSinkState {
                written: Vec::new(),
                fail_when: None,
            }),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Fail sends matching the predicate (builder-style)
    pub fn fail_when<F>(self, predicate: F) -> Self
    where
        F: Fn(&SourceRecord) -> bool + Send + Sync + 'static,
    {
        self.set_fail_when(predicate);
        self
    }

    /// Replace the failure condition at runtime
    pub fn set_fail_when<F>(&self, predicate: F)
    where
        F: Fn(&SourceRecord) -> bool + Send + Sync + 'static,
    {
        self.state.lock().fail_when = Some(Box::new(predicate));
    }

    /// Accept everything from now on
    pub fn clear_fail_condition(&self) {
        self.state.lock().fail_when = None;
    }

    /// Delay every send by the given duration (builder-style), for
    /// exercising in-flight backpressure
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = latency;
        self
    }

    /// Records delivered so far
    pub fn written(&self) -> Vec<SourceRecord> {
        self.state.lock().written.clone()
    }

    /// Number of records delivered so far
    pub fn written_count(&self) -> usize {
        self.state.lock().written.len()
    }
}

#[async_trait]
impl RecordSink for MockRecordSink {
    async fn send(&self, record: &SourceRecord) -> std::result::Result<(), SinkError> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        if let Some(predicate) = &state.fail_when {
            if predicate(record) {
                return Err(SinkError::rejected(format!(
                    "simulated failure for {}@{}",
                    record.partition_key(),
                    record.offset
                )));
            }
        }
        state.written.push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Polling helper
// ============================================================================

/// Repeatedly evaluate an async condition until it holds or the timeout
/// elapses. Returns whether the condition held.
pub async fn poll_until<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_mock_consumer_assigns_matching_topics() {
        let consumer = MockConsumer::new()
            .with_topic("YummyPizza", 1)
            .with_topic("HealthySalad", 1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pattern = Regex::new(r"\w+Pizza").unwrap();

        consumer.subscribe(&pattern, tx).await.unwrap();
        let assignment = rx.recv().await.unwrap();
        assert!(assignment.contains(&PartitionKey::new("YummyPizza", 0)));
        assert!(!assignment.contains(&PartitionKey::new("HealthySalad", 0)));
    }

    #[tokio::test]
    async fn test_mock_consumer_pause_and_seek() {
        let consumer = MockConsumer::new().with_topic("orders", 1);
        let (tx, _rx) = mpsc::unbounded_channel();
        consumer
            .subscribe(&Regex::new("orders").unwrap(), tx)
            .await
            .unwrap();
        consumer.produce("orders", None, "a");
        consumer.produce("orders", None, "b");

        let batch = consumer.poll(Duration::from_millis(1)).await.unwrap();
        assert_eq!(batch.len(), 2);

        let key = PartitionKey::new("orders", 0);
        let paused: AssignmentSet = [key.clone()].into_iter().collect();
        consumer.pause(&paused).await.unwrap();
        consumer.produce("orders", None, "c");
        assert!(consumer
            .poll(Duration::from_millis(1))
            .await
            .unwrap()
            .is_empty());

        consumer.resume(&paused).await.unwrap();
        consumer.seek(&key, 1).await.unwrap();
        let batch = consumer.poll(Duration::from_millis(1)).await.unwrap();
        let offsets: Vec<i64> = batch.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_mock_sink_fail_condition() {
        let sink = MockRecordSink::new().fail_when(|r| r.offset == 1);
        let ok = SourceRecord::new("t", 0, 0, None, Bytes::from_static(b"x"));
        let bad = SourceRecord::new("t", 0, 1, None, Bytes::from_static(b"y"));

        assert!(sink.send(&ok).await.is_ok());
        assert!(sink.send(&bad).await.is_err());
        assert_eq!(sink.written_count(), 1);

        sink.clear_fail_condition();
        assert!(sink.send(&bad).await.is_ok());
        assert_eq!(sink.written_count(), 2);
    }

    #[tokio::test]
    async fn test_poll_until() {
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let setter = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            setter.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        let checker = flag.clone();
        assert!(
            poll_until(
                move || {
                    let f = checker.clone();
                    async move { f.load(std::sync::atomic::Ordering::SeqCst) }
                },
                Duration::from_secs(1)
            )
            .await
        );
    }
}
