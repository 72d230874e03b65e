//! Durable job store for the Solstice scheduler.
//!
//! This crate owns the persisted data model (jobs, schedules, payloads,
//! delivery plans, run telemetry) and a file-backed store with
//! load/modify/persist semantics. All mutation is expected to happen under
//! the scheduler's single process-wide lock; the store itself stays
//! synchronous and dumb.

mod error;
mod store;
mod types;

pub use error::StoreError;
pub use store::JobStore;
pub use types::{
    DeliveryMode, DeliveryPlan, DeliveryStatus, FailureAlert, FailureAlertPolicy, Job, JobState,
    Payload, RunStatus, Schedule, SessionTarget, WakeMode,
};
