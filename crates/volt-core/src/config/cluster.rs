use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Heartbeat interval used when seeding the shared config (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Heartbeat timeout used when seeding the shared config (seconds).
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Consecutive loop failures before the store is reported as failing.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Capacity of the distribute request queue.
    #[serde(default = "default_distribute_queue")]
    pub distribute_queue_size: usize,
}

impl ClusterConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            failure_threshold: default_failure_threshold(),
            distribute_queue_size: default_distribute_queue(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    3
}

fn default_heartbeat_timeout() -> u64 {
    6
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_distribute_queue() -> usize {
    16
}

/// Failure supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverwatchConfig {
    /// How long the store must stay error-free before components restart (seconds).
    #[serde(default = "default_health_watch")]
    pub health_watch_secs: u64,

    /// Delay before re-opening a failed recovery watch (seconds).
    #[serde(default = "default_watch_retry")]
    pub watch_retry_secs: u64,

    /// How often the recovery timer is checked (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Capacity of the failure report queue.
    #[serde(default = "default_report_queue")]
    pub report_queue_size: usize,
}

impl OverwatchConfig {
    pub fn health_watch(&self) -> Duration {
        Duration::from_secs(self.health_watch_secs)
    }

    pub fn watch_retry(&self) -> Duration {
        Duration::from_secs(self.watch_retry_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for OverwatchConfig {
    fn default() -> Self {
        Self {
            health_watch_secs: default_health_watch(),
            watch_retry_secs: default_watch_retry(),
            poll_interval_ms: default_poll_interval(),
            report_queue_size: default_report_queue(),
        }
    }
}

fn default_health_watch() -> u64 {
    10
}

fn default_watch_retry() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_report_queue() -> usize {
    64
}
