//! Execution engine.
//!
//! Owns the scheduler state: the job store behind the single process-wide
//! lock, the wake timer, the host seams, and the tick pipeline. Job bodies
//! always run outside the lock; the lock only covers load/mutate/persist,
//! so a slow job never blocks unrelated store reads or the next tick's
//! marking phase.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use solstice_store::{Job, JobStore, Payload, RunStatus, Schedule, SessionTarget, WakeMode};

use crate::config::{MAX_TIMER_DELAY_MS, SchedulerConfig};
use crate::error::{HostError, SchedulerError};
use crate::events::{EventBus, SchedulerEvent};
use crate::host::{
    Clock, EventContext, FailureAlertMessage, HeartbeatOutcome, HeartbeatRequest, HostHooks,
    SystemClock,
};
use crate::policy::{RunOutcome, apply_outcome};
use crate::retry::ErrorClassifier;
use crate::schedule::next_run_with_floor;
use crate::timer::WakeTimer;

/// Snapshot of scheduler health for hosts and admin surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub jobs: usize,
    pub next_wake_at_ms: Option<i64>,
}

struct SchedulerInner {
    /// The single process-wide critical section: every read or write of the
    /// job collection (memory and disk) goes through this lock.
    store: Mutex<JobStore>,
    host: Arc<dyn HostHooks>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    classifier: ErrorClassifier,
    events: EventBus,
    timer: WakeTimer,
    /// True while a tick is mid-flight.
    tick_running: AtomicBool,
    stopped: AtomicBool,
    last_sweep_at_ms: AtomicI64,
}

/// The scheduler. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler over `store`, executing through `host`, with the
    /// system clock and default error classification.
    pub fn new(store: JobStore, host: Arc<dyn HostHooks>, config: SchedulerConfig) -> Self {
        Self::with_parts(
            store,
            host,
            config,
            ErrorClassifier::default(),
            Arc::new(SystemClock),
        )
    }

    /// Full-control constructor: inject the clock and classifier.
    pub fn with_parts(
        store: JobStore,
        host: Arc<dyn HostHooks>,
        config: SchedulerConfig,
        classifier: ErrorClassifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store: Mutex::new(store),
                host,
                clock,
                config,
                classifier,
                events: EventBus::default(),
                timer: WakeTimer::new(),
                tick_running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                last_sweep_at_ms: AtomicI64::new(0),
            }),
        }
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    pub(crate) fn store(&self) -> &Mutex<JobStore> {
        &self.inner.store
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a wake is currently pending.
    pub fn is_timer_armed(&self) -> bool {
        self.inner.timer.is_armed()
    }

    /// Load the store, catch up jobs missed while the process was down,
    /// and arm the timer.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if !self.inner.config.enabled {
            info!("scheduling disabled, not starting");
            return Ok(());
        }

        let recovered = self.recover_missed_jobs().await?;

        {
            let mut store = self.inner.store.lock().await;
            store.ensure_loaded(false)?;
            if maintenance_recompute(&mut store, self.now_ms()) {
                store.persist()?;
            }
        }

        self.arm_timer().await;
        info!(recovered, "scheduler started");
        Ok(())
    }

    /// Stop scheduling: disarm the timer and refuse further ticks. An
    /// in-flight tick finishes on its own.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.timer.disarm();
        info!("scheduler stopped");
    }

    /// Add a job. Assigns the initial next-run slot if the caller left it
    /// unset, persists, and re-arms the timer.
    pub async fn add_job(&self, mut job: Job) -> Result<Job, SchedulerError> {
        let now = self.now_ms();
        {
            let mut store = self.inner.store.lock().await;
            store.ensure_loaded(true)?;
            if job.enabled && job.state.next_run_at_ms.is_none() {
                job.state.next_run_at_ms = natural_next_run(&job, now);
            }
            job.updated_at_ms = now;
            store.add(job.clone())?;
            store.persist()?;
        }
        info!(job_id = %job.id, name = %job.name, next_run_at_ms = ?job.state.next_run_at_ms, "job added");
        self.arm_timer().await;
        Ok(job)
    }

    /// Apply a host mutation to a job and persist it. A schedule change
    /// resets the slot and the error streak; the modified stamp is bumped
    /// either way.
    pub async fn update_job<F>(&self, id: &str, f: F) -> Result<Job, SchedulerError>
    where
        F: FnOnce(&mut Job),
    {
        let now = self.now_ms();
        let updated = {
            let mut store = self.inner.store.lock().await;
            store.ensure_loaded(true)?;
            let Some(job) = store.get_mut(id) else {
                return Err(SchedulerError::JobNotFound(id.to_string()));
            };
            let old_schedule = job.schedule.clone();
            f(job);
            if job.schedule != old_schedule {
                job.state.next_run_at_ms = None;
                job.state.consecutive_errors = 0;
            }
            if job.enabled
                && job.state.next_run_at_ms.is_none()
                && !(job.schedule.is_one_shot() && job.state.last_run_at_ms.is_some())
            {
                job.state.next_run_at_ms = natural_next_run(job, now);
            }
            job.updated_at_ms = now;
            let updated = job.clone();
            store.persist()?;
            updated
        };
        self.arm_timer().await;
        Ok(updated)
    }

    /// Remove a job. Returns false when no such job exists.
    pub async fn remove_job(&self, id: &str) -> Result<bool, SchedulerError> {
        let removed = {
            let mut store = self.inner.store.lock().await;
            store.ensure_loaded(true)?;
            let removed = store.remove(id);
            if removed.is_some() {
                store.persist()?;
            }
            removed
        };
        match removed {
            Some(job) => {
                info!(job_id = %id, name = %job.name, "job removed");
                self.inner.events.emit(SchedulerEvent::Removed {
                    job_id: job.id,
                    name: job.name,
                });
                self.arm_timer().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Flip a job's enabled gate, filling the next-run slot when enabling.
    pub async fn set_job_enabled(&self, id: &str, enabled: bool) -> Result<bool, SchedulerError> {
        let now = self.now_ms();
        let found = {
            let mut store = self.inner.store.lock().await;
            store.ensure_loaded(true)?;
            let found = store.set_enabled(id, enabled);
            if found {
                if enabled
                    && let Some(job) = store.get_mut(id)
                    && job.state.next_run_at_ms.is_none()
                {
                    job.state.next_run_at_ms = natural_next_run(job, now);
                    job.updated_at_ms = now;
                }
                store.persist()?;
            }
            found
        };
        if found {
            self.arm_timer().await;
        }
        Ok(found)
    }

    /// All jobs, for admin listings.
    pub async fn list_jobs(&self) -> Result<Vec<Job>, SchedulerError> {
        let mut store = self.inner.store.lock().await;
        store.ensure_loaded(false)?;
        Ok(store.jobs().to_vec())
    }

    /// One job by id.
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, SchedulerError> {
        let mut store = self.inner.store.lock().await;
        store.ensure_loaded(false)?;
        Ok(store.get(id).cloned())
    }

    /// Scheduler health snapshot.
    pub async fn status(&self) -> Result<SchedulerStatus, SchedulerError> {
        let mut store = self.inner.store.lock().await;
        store.ensure_loaded(false)?;
        let next_wake_at_ms = store.jobs().iter().filter_map(pending_next_run).min();
        Ok(SchedulerStatus {
            enabled: self.inner.config.enabled && !self.inner.stopped.load(Ordering::SeqCst),
            jobs: store.len(),
            next_wake_at_ms,
        })
    }

    /// Run a tick immediately, as if the timer had fired.
    pub async fn tick_now(&self) {
        self.on_timer().await;
    }

    /// Timer entry point.
    ///
    /// If a previous tick is still executing this never leaves the
    /// scheduler with zero timers pending: it re-arms a fixed recheck and
    /// returns, so one long-running job body cannot silently kill the
    /// scheduler.
    pub(crate) async fn on_timer(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) || !self.inner.config.enabled {
            return;
        }
        if self.inner.tick_running.swap(true, Ordering::SeqCst) {
            debug!("tick already in flight, arming watchdog recheck");
            self.arm_watchdog();
            return;
        }

        // Watchdog stays armed while this tick runs.
        self.arm_watchdog();

        if let Err(e) = self.run_tick().await {
            warn!(error = %e, "tick failed; state abandoned until next wake");
        }

        self.inner.tick_running.store(false, Ordering::SeqCst);
        // Always re-arm from the updated store, even after a failed tick.
        self.arm_timer().await;
    }

    /// One full tick: mark due jobs under the lock, execute them outside
    /// it, apply outcomes under a fresh lock, then piggyback the session
    /// sweep.
    async fn run_tick(&self) -> Result<(), SchedulerError> {
        let due = self.mark_due_jobs().await?;

        if !due.is_empty() {
            debug!(count = due.len(), "executing due jobs");
            let outcomes = self.run_batch(due).await;
            self.apply_batch(outcomes).await?;
        }

        self.maybe_sweep_sessions().await;
        Ok(())
    }

    /// Phase 1: under the lock, reload, select due jobs, and persist their
    /// running marks as one batch before any execution begins. When nothing
    /// is due, run a maintenance recompute instead (it only fills missing
    /// slots, never consumes or postpones a due one).
    async fn mark_due_jobs(&self) -> Result<Vec<Job>, SchedulerError> {
        let mut store = self.inner.store.lock().await;
        store.ensure_loaded(true)?;
        let now = self.now_ms();

        let mut due = Vec::new();
        for job in store.jobs_mut() {
            if job.is_due(now) {
                job.state.running_at_ms = Some(now);
                due.push(job.clone());
            }
        }

        if due.is_empty() {
            if maintenance_recompute(&mut store, now) {
                store.persist()?;
            }
            return Ok(Vec::new());
        }

        store.persist()?;

        for job in &due {
            self.inner.events.emit(SchedulerEvent::Started {
                job_id: job.id.clone(),
                name: job.name.clone(),
                at_ms: now,
            });
        }
        Ok(due)
    }

    /// Phase 2: run the batch through a bounded worker pool. Workers pull
    /// indices from a shared cursor, so independent fast jobs are not stuck
    /// behind one slow job beyond the concurrency limit.
    async fn run_batch(&self, due: Vec<Job>) -> Vec<(String, RunOutcome)> {
        let concurrency = self.inner.config.max_concurrency.max(1).min(due.len());
        let jobs = Arc::new(due);
        let cursor = Arc::new(AtomicUsize::new(0));
        let results = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut workers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let scheduler = self.clone();
            let jobs = jobs.clone();
            let cursor = cursor.clone();
            let results = results.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(job) = jobs.get(idx) else { break };
                    let outcome = scheduler.execute_job(job).await;
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((job.id.clone(), outcome));
                }
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "job worker task failed");
            }
        }

        let mut results =
            std::mem::take(&mut *results.lock().unwrap_or_else(PoisonError::into_inner));

        // A dead worker leaves its claimed job, and with it the rest of the
        // batch it would have pulled, without an outcome. Record an error
        // for each so the apply phase still clears their running marks.
        let now = self.now_ms();
        for job in jobs.iter() {
            if !results.iter().any(|(id, _)| id == &job.id) {
                warn!(job_id = %job.id, "job outcome lost to a worker failure; recording an error");
                results.push((
                    job.id.clone(),
                    RunOutcome::error("job runner failed before reporting an outcome", now, now),
                ));
            }
        }
        results
    }

    /// Phase 3: under a fresh lock, apply all outcomes as one batch, emit
    /// finished/removed events, and recompute slots for jobs that became
    /// due mid-tick. Alerts go out after the lock is released.
    pub(crate) async fn apply_batch(
        &self,
        outcomes: Vec<(String, RunOutcome)>,
    ) -> Result<(), SchedulerError> {
        let mut events = Vec::new();
        let mut alerts = Vec::new();

        {
            let mut store = self.inner.store.lock().await;
            store.ensure_loaded(true)?;
            let now = self.now_ms();

            for (job_id, outcome) in &outcomes {
                let Some(job) = store.get_mut(job_id) else {
                    warn!(job_id = %job_id, "job vanished mid-run; dropping outcome");
                    continue;
                };
                let delivery_requested = self.inner.host.resolve_delivery_plan(job).requested;
                let disposition = apply_outcome(
                    job,
                    outcome,
                    delivery_requested,
                    &self.inner.config,
                    &self.inner.classifier,
                    now,
                );

                events.push(SchedulerEvent::Finished {
                    job_id: job.id.clone(),
                    name: job.name.clone(),
                    status: outcome.status,
                    error: outcome.error.clone(),
                    summary: outcome.summary.clone(),
                    delivery_status: disposition.delivery_status,
                    duration_ms: outcome.ended_at_ms - outcome.started_at_ms,
                    next_run_at_ms: job.state.next_run_at_ms,
                });
                if let Some(alert) = disposition.alert {
                    alerts.push(alert);
                }
                if disposition.delete
                    && let Some(removed) = store.remove(job_id)
                {
                    debug!(job_id = %job_id, "one-shot job deleted after successful run");
                    events.push(SchedulerEvent::Removed {
                        job_id: removed.id,
                        name: removed.name,
                    });
                }
            }

            maintenance_recompute(&mut store, self.now_ms());
            store.persist()?;
        }

        for event in events {
            self.inner.events.emit(event);
        }
        for alert in alerts {
            self.deliver_failure_alert(alert).await;
        }
        Ok(())
    }

    /// Execute one job body with optional deadline. The token is the job's
    /// cooperative cancellation signal: on expiry we cancel it, stop
    /// waiting, and record a timeout error.
    pub(crate) async fn execute_job(&self, job: &Job) -> RunOutcome {
        let started_at_ms = self.now_ms();
        debug!(job_id = %job.id, name = %job.name, "executing job");

        let cancel = CancellationToken::new();
        let body = self.dispatch(job, cancel.clone());

        let mut outcome = match self.inner.config.job_timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), body).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        cancel.cancel();
                        warn!(job_id = %job.id, timeout_ms, "job timed out");
                        RunOutcome::error("timed out", 0, 0)
                    }
                }
            }
            None => body.await,
        };

        outcome.started_at_ms = started_at_ms;
        outcome.ended_at_ms = self.now_ms();
        outcome
    }

    /// Route a due job to its execution path.
    async fn dispatch(&self, job: &Job, cancel: CancellationToken) -> RunOutcome {
        match job.session_target {
            SessionTarget::Main => self.dispatch_main(job).await,
            SessionTarget::Isolated => self.dispatch_isolated(job, cancel).await,
        }
    }

    /// Main-session path: inject the system-event text into the shared
    /// timeline, then (wake mode `now`) chase it with a heartbeat pass.
    async fn dispatch_main(&self, job: &Job) -> RunOutcome {
        let Payload::SystemEvent { text } = &job.payload else {
            return RunOutcome::skipped("main-session job requires a system event payload", 0, 0);
        };
        let text = text.trim();
        if text.is_empty() {
            return RunOutcome::skipped("empty system event text", 0, 0);
        }

        let ctx = EventContext {
            agent_id: job.agent_id.clone(),
            session_key: Some(job.session_key()),
            context_key: None,
        };
        if let Err(e) = self.inner.host.enqueue_system_event(text, &ctx).await {
            return RunOutcome::error(e.to_string(), 0, 0);
        }

        if job.wake_mode == WakeMode::Now {
            // Best-effort: the injection already landed, so a heartbeat
            // failure is logged, not counted against the job.
            self.trigger_heartbeat(job).await;
        }
        RunOutcome::ok(0, 0)
    }

    /// Request a synchronous heartbeat, waiting out a busy runner with a
    /// bounded poll before degrading to an async request.
    async fn trigger_heartbeat(&self, job: &Job) {
        let req = HeartbeatRequest {
            reason: format!("job:{}", job.id),
            agent_id: job.agent_id.clone(),
            session_key: Some(job.session_key()),
        };
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.inner.config.heartbeat_wait_ms);

        loop {
            match self.inner.host.run_heartbeat_once(&req).await {
                Ok(outcome) if outcome.is_busy() => {
                    if tokio::time::Instant::now() >= deadline {
                        debug!(job_id = %job.id, "heartbeat runner still busy; requesting async pass");
                        if let Err(e) = self.inner.host.request_heartbeat_now(&req).await {
                            warn!(job_id = %job.id, error = %e, "async heartbeat request failed");
                        }
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(self.inner.config.heartbeat_poll_ms))
                        .await;
                }
                Ok(HeartbeatOutcome::Ran) => return,
                Ok(other) => {
                    debug!(job_id = %job.id, outcome = ?other, "heartbeat pass not run");
                    return;
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "heartbeat attempt failed; requesting async pass");
                    if let Err(e) = self.inner.host.request_heartbeat_now(&req).await {
                        warn!(job_id = %job.id, error = %e, "async heartbeat request failed");
                    }
                    return;
                }
            }
        }
    }

    /// Isolated path: delegate to the host's agent runner, then make sure a
    /// produced summary is never silently lost.
    async fn dispatch_isolated(&self, job: &Job, cancel: CancellationToken) -> RunOutcome {
        let Payload::AgentTurn { message, .. } = &job.payload else {
            return RunOutcome::skipped("isolated job requires an agent turn payload", 0, 0);
        };

        let report = match self.inner.host.run_isolated_job(job, message, cancel).await {
            Ok(report) => report,
            Err(e) => return RunOutcome::error(e.to_string(), 0, 0),
        };

        let outcome = RunOutcome {
            status: report.status.unwrap_or(RunStatus::Ok),
            error: report.error,
            summary: report.summary,
            delivered: report.delivered,
            delivery_attempted: report.delivery_attempted,
            delivery_error: report.delivery_error,
            started_at_ms: 0,
            ended_at_ms: 0,
        };

        // Fallback: delivery was requested but never attempted, and the
        // failure (if any) is not about the delivery target itself. Posting
        // into the main timeline keeps the result visible without risking a
        // duplicate user-facing message.
        let delivery_requested = self.inner.host.resolve_delivery_plan(job).requested;
        if let Some(summary) = &outcome.summary
            && delivery_requested
            && outcome.delivered != Some(true)
            && !outcome.delivery_attempted
            && !is_delivery_target_error(outcome.error.as_deref())
        {
            let ctx = EventContext {
                agent_id: job.agent_id.clone(),
                session_key: Some(job.session_key()),
                context_key: None,
            };
            if let Err(e) = self.inner.host.enqueue_system_event(summary, &ctx).await {
                warn!(job_id = %job.id, error = %e, "summary fallback injection failed");
            } else {
                debug!(job_id = %job.id, "posted undelivered summary into main timeline");
            }
        }

        outcome
    }

    /// Deliver a failure alert, degrading to a timeline injection plus an
    /// async heartbeat request when the host has no dedicated channel.
    /// Alert failures are logged and never block scheduling.
    async fn deliver_failure_alert(&self, alert: FailureAlertMessage) {
        match self.inner.host.send_failure_alert(&alert).await {
            Ok(()) => {}
            Err(HostError::Unsupported) => {
                let ctx = EventContext {
                    agent_id: None,
                    session_key: Some(format!("job:{}", alert.job_id)),
                    context_key: None,
                };
                if let Err(e) = self.inner.host.enqueue_system_event(&alert.text, &ctx).await {
                    warn!(job_id = %alert.job_id, error = %e, "failure alert fallback injection failed");
                    return;
                }
                let req = HeartbeatRequest {
                    reason: "job-failure-alert".to_string(),
                    agent_id: None,
                    session_key: None,
                };
                if let Err(e) = self.inner.host.request_heartbeat_now(&req).await {
                    warn!(job_id = %alert.job_id, error = %e, "failure alert heartbeat request failed");
                }
            }
            Err(e) => {
                warn!(job_id = %alert.job_id, error = %e, "failure alert delivery failed");
            }
        }
    }

    /// Self-throttled session-cleanup sweep, piggybacked on ticks. Failures
    /// never abort the tick.
    async fn maybe_sweep_sessions(&self) {
        let now = self.now_ms();
        let last = self.inner.last_sweep_at_ms.load(Ordering::SeqCst);
        if now - last < self.inner.config.reap_interval_ms {
            return;
        }
        if self
            .inner
            .last_sweep_at_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        match self.inner.host.sweep_sessions().await {
            Ok(0) => {}
            Ok(reaped) => debug!(reaped, "session sweep finished"),
            Err(e) => warn!(error = %e, "session sweep failed"),
        }
    }

    /// Arm a fixed-interval recheck while a tick is executing.
    fn arm_watchdog(&self) {
        self.arm_wake(Duration::from_millis(MAX_TIMER_DELAY_MS as u64));
    }

    /// Arm the wake timer with a trampoline that hands the tick off to its
    /// own task. The timer slot then only ever holds the trampoline, so a
    /// re-arm from inside a running tick aborts at most the (finished)
    /// trampoline, never the tick that issued it.
    fn arm_wake(&self, delay: Duration) {
        let scheduler = self.clone();
        self.inner.timer.arm(delay, async move {
            scheduler.spawn_tick();
        });
    }

    /// Run the tick pipeline as a detached task. Boxing the tick keeps the
    /// arm-from-tick recursion out of the timer's generic future bound.
    fn spawn_tick(&self) {
        let scheduler = self.clone();
        let tick: Pin<Box<dyn Future<Output = ()> + Send>> =
            Box::pin(async move { scheduler.on_timer().await });
        tokio::spawn(tick);
    }

    /// Re-arm the wake timer from the current store state. The delay is
    /// capped at [`MAX_TIMER_DELAY_MS`] so the scheduler re-evaluates at
    /// least once a minute regardless of clock jumps.
    pub(crate) async fn arm_timer(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) || !self.inner.config.enabled {
            self.inner.timer.disarm();
            return;
        }

        let next = {
            let mut store = self.inner.store.lock().await;
            if let Err(e) = store.ensure_loaded(false) {
                warn!(error = %e, "store load failed while arming timer; rechecking later");
                drop(store);
                self.arm_watchdog();
                return;
            }
            store.jobs().iter().filter_map(pending_next_run).min()
        };

        match next {
            Some(at) => {
                let delay = (at - self.now_ms()).clamp(0, MAX_TIMER_DELAY_MS);
                self.arm_wake(Duration::from_millis(delay as u64));
            }
            None => {
                if self.inner.tick_running.load(Ordering::SeqCst) {
                    // A tick may reschedule jobs; keep the watchdog alive.
                    self.arm_watchdog();
                } else {
                    self.inner.timer.disarm();
                }
            }
        }
    }
}

/// Next-run slot the timer should consider for a job, ignoring stale
/// one-shot slots that can no longer fire.
fn pending_next_run(job: &Job) -> Option<i64> {
    if !job.enabled || job.state.running_at_ms.is_some() {
        return None;
    }
    let next = job.state.next_run_at_ms?;
    if job.schedule.is_one_shot()
        && let Some(last) = job.state.last_run_at_ms
        && next <= last
    {
        return None;
    }
    Some(next)
}

/// Natural next run for a job outside the outcome path: interval schedules
/// anchor on the last run (or creation), calendar schedules evaluate from
/// now with the refire floor at the last run's end.
pub(crate) fn natural_next_run(job: &Job, now_ms: i64) -> Option<i64> {
    let (from, floor) = match &job.schedule {
        Schedule::Every { .. } => {
            let base = job.state.last_run_at_ms.unwrap_or(job.created_at_ms);
            (base, base)
        }
        _ => {
            let last_end = job
                .state
                .last_run_at_ms
                .map(|s| s + job.state.last_duration_ms.unwrap_or(0));
            (now_ms, last_end.unwrap_or(now_ms))
        }
    };
    next_run_with_floor(&job.schedule, from, floor)
}

/// Fill missing next-run slots for enabled, idle jobs. Returns whether
/// anything changed.
///
/// This is deliberately fill-only: a slot that is already set, due or not,
/// is never moved, so maintenance can never consume a due slot or push one
/// past "now" without an execution. One-shots that already ran are policy
/// territory (their only valid future slots are retry slots) and are left
/// alone.
pub(crate) fn maintenance_recompute(store: &mut JobStore, now_ms: i64) -> bool {
    let mut changed = false;
    for job in store.jobs_mut() {
        if !job.enabled || job.state.running_at_ms.is_some() {
            continue;
        }
        if job.schedule.is_one_shot() && job.state.last_run_at_ms.is_some() {
            continue;
        }
        if job.state.next_run_at_ms.is_some() {
            continue;
        }
        if let Some(next) = natural_next_run(job, now_ms) {
            debug!(job_id = %job.id, next_run_at_ms = next, "filled missing next-run slot");
            job.state.next_run_at_ms = Some(next);
            changed = true;
        }
    }
    changed
}

/// Whether an error is about the delivery target itself, in which case the
/// summary fallback would just fail the same way (or double-post).
fn is_delivery_target_error(error: Option<&str>) -> bool {
    error.is_some_and(|e| {
        let e = e.to_ascii_lowercase();
        e.contains("deliver") || e.contains("channel") || e.contains("recipient")
    })
}
