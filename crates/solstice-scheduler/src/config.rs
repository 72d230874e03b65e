//! Scheduler configuration.

use serde::{Deserialize, Serialize};
use solstice_store::FailureAlertPolicy;

/// Ceiling on any single timer delay. The scheduler re-evaluates at least
/// this often, which bounds drift recovery after a paused process or a
/// system clock jump.
pub const MAX_TIMER_DELAY_MS: i64 = 60_000;

/// Minimum gap between a finished cron run and its next fire, guarding
/// against timezone/DST edges that would otherwise spin-loop the timer.
pub const MIN_REFIRE_GAP_MS: i64 = 2_000;

/// Default retry backoff ladder, indexed by consecutive-error count.
pub const DEFAULT_BACKOFF_LADDER_MS: [i64; 5] = [30_000, 60_000, 300_000, 900_000, 3_600_000];

/// Default cap on retry attempts for transient one-shot failures.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Ceiling on the synchronous heartbeat busy-wait.
pub const DEFAULT_HEARTBEAT_WAIT_MS: u64 = 120_000;

/// Poll interval while waiting out a busy heartbeat runner.
pub const DEFAULT_HEARTBEAT_POLL_MS: u64 = 250;

/// Minimum gap between two session-reaper sweeps.
pub const DEFAULT_REAP_INTERVAL_MS: i64 = 300_000;

/// Tunables for the scheduler core. `Default` matches production behavior;
/// hosts deserialize this from their own config layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Global gate: when false the timer never arms and ticks do nothing.
    pub enabled: bool,
    /// Upper bound on concurrently executing job bodies.
    pub max_concurrency: usize,
    /// Optional per-job execution deadline. Expiry cancels the run's token
    /// and records a timeout error.
    pub job_timeout_ms: Option<u64>,
    /// Retry backoff ladder in milliseconds, indexed by consecutive-error
    /// count (clamped to the last entry).
    pub backoff_ladder_ms: Vec<i64>,
    /// Transient one-shot failures retry at most this many times before the
    /// job is disabled.
    pub max_attempts: u32,
    /// Process-wide failure-alert policy. Per-job settings override it.
    pub failure_alert: Option<FailureAlertPolicy>,
    /// Ceiling on the synchronous heartbeat busy-wait.
    pub heartbeat_wait_ms: u64,
    /// Poll interval while the heartbeat runner reports busy.
    pub heartbeat_poll_ms: u64,
    /// Minimum gap between session-reaper sweeps.
    pub reap_interval_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 1,
            job_timeout_ms: None,
            backoff_ladder_ms: DEFAULT_BACKOFF_LADDER_MS.to_vec(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            failure_alert: None,
            heartbeat_wait_ms: DEFAULT_HEARTBEAT_WAIT_MS,
            heartbeat_poll_ms: DEFAULT_HEARTBEAT_POLL_MS,
            reap_interval_ms: DEFAULT_REAP_INTERVAL_MS,
        }
    }
}

impl SchedulerConfig {
    /// Backoff delay for the given consecutive-error count (1-based).
    pub fn backoff_ms(&self, consecutive_errors: u32) -> i64 {
        if self.backoff_ladder_ms.is_empty() {
            return DEFAULT_BACKOFF_LADDER_MS[0];
        }
        let idx = (consecutive_errors.max(1) as usize - 1).min(self.backoff_ladder_ms.len() - 1);
        self.backoff_ladder_ms[idx]
    }
}
