//! Error types for skein-mirror
//!
//! Only configuration and subscription problems are fatal; everything else
//! degrades to partition-local pause handling instead of task failure.

use std::fmt;
use thiserror::Error;

/// Result type alias for mirror task operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Main error type for the mirror task runtime
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Inconsistent or missing required configuration (fatal at startup)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Source subscription could not be established (fatal at startup)
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Source consumer call failed
    #[error("consumer error: {0}")]
    Consumer(String),

    /// Operation attempted in the wrong lifecycle state
    #[error("invalid task state: {0}")]
    State(String),

    /// Shutdown requested
    #[error("shutdown requested")]
    Shutdown,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MirrorError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a subscription error
    pub fn subscription(msg: impl Into<String>) -> Self {
        Self::Subscription(msg.into())
    }

    /// Create a consumer error
    pub fn consumer(msg: impl Into<String>) -> Self {
        Self::Consumer(msg.into())
    }

    /// Create an invalid-state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Check if this error prevents the task from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Subscription(_))
    }

    /// Check if this is a shutdown error
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

/// Errors returned by the destination sink for a single send attempt.
///
/// Always treated as transient: the owning partition is auto-paused and
/// retried, never escalated to a task-level failure.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The destination rejected the record
    #[error("send rejected: {0}")]
    Rejected(String),

    /// The destination was unreachable or timed out
    #[error("destination unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    /// Create a rejection error
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create an unavailability error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Constructed, not yet started
    Created,
    /// Poll/delivery loop is active
    Running,
    /// Stop requested, loop draining
    Stopping,
    /// Loop exited and subscription released
    Stopped,
}

impl TaskStatus {
    /// Check if the task has finished shutting down
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
