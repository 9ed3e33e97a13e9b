//! Metrics trait for task observability
//!
//! The reconciler and task loop report through an injected metrics sink
//! rather than a process-wide registry; [`MetricsCollector`] is the
//! in-memory implementation, [`NoopMetrics`] discards everything.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValue {
    /// A counter that only goes up
    Counter(u64),
    /// A gauge that can go up or down
    Gauge(i64),
}

/// A metric label pair
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct Label {
    /// Label name
    pub name: String,
    /// Label value
    pub value: String,
}

impl Label {
    /// Create a new label
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Trait for types that can collect metrics
pub trait Metrics: Send + Sync {
    /// Increment a counter by the given value
    fn increment(&self, name: &str, value: u64);

    /// Increment a counter with labels
    fn increment_with_labels(&self, name: &str, value: u64, labels: &[Label]);

    /// Set a gauge value
    fn gauge(&self, name: &str, value: i64);

    /// Set a gauge with labels
    fn gauge_with_labels(&self, name: &str, value: i64, labels: &[Label]);

    /// Get all current metrics
    fn snapshot(&self) -> MetricsSnapshot;
}

/// A snapshot of all metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// All metrics keyed by name (labels encoded as `name{k=v,...}`)
    pub metrics: HashMap<String, MetricValue>,
}

impl MetricsSnapshot {
    /// Get a counter value
    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.metrics.get(name) {
            Some(MetricValue::Counter(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a gauge value
    pub fn gauge(&self, name: &str) -> Option<i64> {
        match self.metrics.get(name) {
            Some(MetricValue::Gauge(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Simple in-memory metrics collector
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, i64>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    fn key_with_labels(name: &str, labels: &[Label]) -> String {
        if labels.is_empty() {
            name.to_string()
        } else {
            let label_str: Vec<_> = labels
                .iter()
                .map(|l| format!("{}={}", l.name, l.value))
                .collect();
            format!("{}{{{}}}", name, label_str.join(","))
        }
    }
}

impl Metrics for MetricsCollector {
    fn increment(&self, name: &str, value: u64) {
        let counters = self.counters.read();
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
        } else {
            drop(counters);
            let mut counters = self.counters.write();
            counters
                .entry(name.to_string())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(value, Ordering::Relaxed);
        }
    }

    fn increment_with_labels(&self, name: &str, value: u64, labels: &[Label]) {
        let key = Self::key_with_labels(name, labels);
        self.increment(&key, value);
    }

    fn gauge(&self, name: &str, value: i64) {
        let mut gauges = self.gauges.write();
        gauges.insert(name.to_string(), value);
    }

    fn gauge_with_labels(&self, name: &str, value: i64, labels: &[Label]) {
        let key = Self::key_with_labels(name, labels);
        self.gauge(&key, value);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let mut metrics = HashMap::new();

        let counters = self.counters.read();
        for (name, counter) in counters.iter() {
            metrics.insert(
                name.clone(),
                MetricValue::Counter(counter.load(Ordering::Relaxed)),
            );
        }

        let gauges = self.gauges.read();
        for (name, value) in gauges.iter() {
            metrics.insert(name.clone(), MetricValue::Gauge(*value));
        }

        MetricsSnapshot { metrics }
    }
}

/// No-op metrics implementation
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment(&self, _name: &str, _value: u64) {}
    fn increment_with_labels(&self, _name: &str, _value: u64, _labels: &[Label]) {}
    fn gauge(&self, _name: &str, _value: i64) {}
    fn gauge_with_labels(&self, _name: &str, _value: i64, _labels: &[Label]) {}

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}

/// Standard mirror task metric names
pub mod metric_names {
    /// Partitions auto-paused after delivery failures (gauge, per task/stream)
    pub const NUM_AUTO_PAUSED_PARTITIONS_ON_ERROR: &str =
        "skein_mirror_num_auto_paused_partitions_on_error";
    /// Partitions auto-paused on in-flight backpressure (gauge, per task/stream)
    pub const NUM_AUTO_PAUSED_PARTITIONS_ON_IN_FLIGHT_MESSAGES: &str =
        "skein_mirror_num_auto_paused_partitions_on_in_flight_messages";
    /// Partitions paused via manual configuration (gauge, per task/stream)
    pub const NUM_CONFIG_PAUSED_PARTITIONS: &str = "skein_mirror_num_config_paused_partitions";
    /// Records delivered to the destination
    pub const RECORDS_MIRRORED: &str = "skein_mirror_records_mirrored_total";
    /// Failed send attempts
    pub const SEND_ERRORS: &str = "skein_mirror_send_errors_total";
    /// Source poll operations
    pub const POLLS: &str = "skein_mirror_polls_total";
    /// Partition reassignments observed
    pub const REBALANCES: &str = "skein_mirror_rebalances_total";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_counter() {
        let collector = MetricsCollector::new();
        collector.increment("test_counter", 5);
        collector.increment("test_counter", 3);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.counter("test_counter"), Some(8));
    }

    #[test]
    fn test_metrics_collector_gauge() {
        let collector = MetricsCollector::new();
        collector.gauge("test_gauge", 100);
        collector.gauge("test_gauge", 50);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.gauge("test_gauge"), Some(50));
    }

    #[test]
    fn test_metrics_with_labels() {
        let collector = MetricsCollector::new();
        let labels = vec![Label::new("task", "mirror-1"), Label::new("stream", "pizza")];
        collector.gauge_with_labels("paused", 2, &labels);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.gauge("paused{task=mirror-1,stream=pizza}"), Some(2));
    }

    #[test]
    fn test_label() {
        let label = Label::new("env", "prod");
        assert_eq!(label.name, "env");
        assert_eq!(label.value, "prod");
    }
}
