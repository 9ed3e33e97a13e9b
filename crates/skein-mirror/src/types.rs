//! Core data types shared across the mirror task

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A single source partition, totally ordered by (topic, partition).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    /// Topic name
    pub topic: String,
    /// Partition id within the topic
    pub partition: i32,
}

impl PartitionKey {
    /// Create a new partition key
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// The set of partitions currently owned by this task instance.
///
/// Replaced wholesale on every reassignment callback, never mutated in place.
pub type AssignmentSet = BTreeSet<PartitionKey>;

/// A record fetched from a source partition
#[derive(Debug, Clone)]
pub struct SourceRecord {
    /// Source topic
    pub topic: String,
    /// Source partition id
    pub partition: i32,
    /// Offset of the record within its partition
    pub offset: i64,
    /// Optional record key
    pub key: Option<Bytes>,
    /// Record payload
    pub value: Bytes,
    /// Record timestamp (source broker time)
    pub timestamp: DateTime<Utc>,
}

impl SourceRecord {
    /// Create a new record
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
            timestamp: Utc::now(),
        }
    }

    /// The partition this record was fetched from
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(self.topic.clone(), self.partition)
    }
}

/// Recognized stream metadata keys
pub mod metadata_keys {
    /// Explicit consumer group id override
    pub const GROUP_ID: &str = "group.id";
    /// Manual pause specification: JSON mapping of topic to partition tokens,
    /// where `"*"` means all currently assigned partitions of that topic
    pub const PAUSED_PARTITIONS: &str = "paused.partitions";
}

/// A logical stream bound to a mirror task: a source topic pattern plus
/// externally owned key/value metadata (group id override, pause config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorStream {
    /// Stream name, also the default consumer group id
    pub name: String,
    /// Regex pattern selecting source topics
    pub source_pattern: String,
    /// Externally owned metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl MirrorStream {
    /// Create a new stream
    pub fn new(name: impl Into<String>, source_pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_pattern: source_pattern.into(),
            metadata: HashMap::new(),
        }
    }

    /// Set a metadata entry (builder-style)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Explicit consumer group id, if configured
    pub fn group_id(&self) -> Option<&str> {
        self.metadata
            .get(metadata_keys::GROUP_ID)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Raw manual pause specification, if configured
    pub fn paused_partitions_json(&self) -> Option<&str> {
        self.metadata
            .get(metadata_keys::PAUSED_PARTITIONS)
            .map(String::as_str)
    }
}
