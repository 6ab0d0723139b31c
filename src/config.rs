//! Configuration types.

use std::time::Duration;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay interposed before each retry attempt.
    pub retry_interval: Duration,
    /// Failures allowed per task before its whole graph is dropped.
    pub max_retries: u32,
    /// Idle poll interval of the driver loop.
    pub tick_interval: Duration,
    /// Cadence of the periodic snapshot task.
    pub snapshot_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(10),
            max_retries: 10,
            tick_interval: Duration::from_millis(500),
            snapshot_interval: Duration::from_secs(60), // 1 minute
        }
    }
}
