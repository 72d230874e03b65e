//! Durable job scheduler for Solstice.
//!
//! This crate provides the scheduling core of a long-running assistant
//! process:
//! - One-off, fixed-interval, and cron schedules with timezone support
//! - A single wake timer with a bounded delay and a watchdog recheck
//! - Bounded-concurrency execution with per-job timeouts and cooperative
//!   cancellation
//! - Retry classification with a backoff ladder and failure-alert cooldowns
//! - Startup recovery of jobs missed while the process was down
//!
//! Job state persistence lives in `solstice-store`; the work a job actually
//! performs is delegated to the host through [`HostHooks`].

mod config;
mod engine;
mod error;
mod events;
mod host;
mod policy;
mod recovery;
mod retry;
mod schedule;
mod timer;

pub use config::{
    DEFAULT_BACKOFF_LADDER_MS, DEFAULT_HEARTBEAT_POLL_MS, DEFAULT_HEARTBEAT_WAIT_MS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_REAP_INTERVAL_MS, MAX_TIMER_DELAY_MS, MIN_REFIRE_GAP_MS,
    SchedulerConfig,
};
pub use engine::{Scheduler, SchedulerStatus};
pub use error::{HostError, SchedulerError};
pub use events::SchedulerEvent;
pub use host::{
    AgentRunReport, Clock, DeliveryResolution, EventContext, FailureAlertMessage,
    HeartbeatOutcome, HeartbeatRequest, HostHooks, SystemClock,
};
pub use policy::RunOutcome;
pub use retry::{ErrorClassifier, TransientCategory};
pub use schedule::{next_run, next_run_with_floor};
