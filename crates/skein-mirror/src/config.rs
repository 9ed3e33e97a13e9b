//! Mirror task tuning configuration

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Tuning knobs for a mirror task.
///
/// All durations are expressed in milliseconds for configuration-file
/// friendliness; accessor methods convert to [`Duration`].
#[derive(Debug, Clone, Deserialize, Serialize, Validate, JsonSchema)]
pub struct MirrorTaskConfig {
    /// Bounded timeout for a single source poll call (default: 250)
    #[serde(default = "default_poll_timeout_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub poll_timeout_ms: u64,

    /// Consecutive delivery failures before a partition is auto-paused
    /// (default: 1)
    #[serde(default = "default_pause_error_threshold")]
    #[validate(range(min = 1, max = 1_000))]
    pub pause_error_threshold: u32,

    /// Retry interval for partitions auto-paused on delivery failure
    /// (default: 600000 = 10 minutes)
    #[serde(default = "default_pause_error_retry_ms")]
    #[validate(range(min = 10, max = 86_400_000))]
    pub pause_error_retry_ms: u64,

    /// Retry interval for partitions auto-paused on in-flight backpressure
    /// (default: 60000)
    #[serde(default = "default_pause_in_flight_retry_ms")]
    #[validate(range(min = 10, max = 86_400_000))]
    pub pause_in_flight_retry_ms: u64,

    /// Maximum unacknowledged sends per partition before auto-pausing it;
    /// 0 disables the in-flight limit (default: 0)
    #[serde(default)]
    pub max_in_flight_per_partition: usize,

    /// Interval of the periodic reconciliation timer, which catches
    /// auto-resume eligibility absent other events (default: 5000)
    #[serde(default = "default_reconcile_interval_ms")]
    #[validate(range(min = 10, max = 300_000))]
    pub reconcile_interval_ms: u64,
}

fn default_poll_timeout_ms() -> u64 {
    250
}
fn default_pause_error_threshold() -> u32 {
    1
}
fn default_pause_error_retry_ms() -> u64 {
    600_000
}
fn default_pause_in_flight_retry_ms() -> u64 {
    60_000
}
fn default_reconcile_interval_ms() -> u64 {
    5_000
}

impl Default for MirrorTaskConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            pause_error_threshold: default_pause_error_threshold(),
            pause_error_retry_ms: default_pause_error_retry_ms(),
            pause_in_flight_retry_ms: default_pause_in_flight_retry_ms(),
            max_in_flight_per_partition: 0,
            reconcile_interval_ms: default_reconcile_interval_ms(),
        }
    }
}

impl MirrorTaskConfig {
    /// Poll timeout as a [`Duration`]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Send-error retry interval as a [`Duration`]
    pub fn pause_error_retry(&self) -> Duration {
        Duration::from_millis(self.pause_error_retry_ms)
    }

    /// In-flight retry interval as a [`Duration`]
    pub fn pause_in_flight_retry(&self) -> Duration {
        Duration::from_millis(self.pause_in_flight_retry_ms)
    }

    /// Reconciliation timer interval as a [`Duration`]
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}
