//! Startup catch-up for jobs missed while the process was down.
//!
//! Runs before the first timer arm: jobs whose persisted slot came due
//! during the outage execute once each, sequentially, through the same
//! mark/execute/apply pipeline as a normal tick. Sequential on purpose,
//! so a cold start cannot burst-load the host. Jobs that race into
//! due-ness while recovery is executing are left for the first real tick.

use tracing::info;

use solstice_store::Job;

use crate::engine::Scheduler;
use crate::error::SchedulerError;
use crate::events::SchedulerEvent;

impl Scheduler {
    /// Execute every job whose slot lapsed while the process was down.
    /// Returns the number of jobs recovered.
    pub async fn recover_missed_jobs(&self) -> Result<usize, SchedulerError> {
        let due = self.mark_missed_jobs().await?;
        if due.is_empty() {
            return Ok(0);
        }

        info!(count = due.len(), "recovering jobs missed while down");
        let mut outcomes = Vec::with_capacity(due.len());
        for job in &due {
            outcomes.push((job.id.clone(), self.execute_job(job).await));
        }
        self.apply_batch(outcomes).await?;
        Ok(due.len())
    }

    /// Select and mark missed jobs from the persisted slots as they were
    /// on disk, without recomputing anything first. Recomputation would
    /// erase the evidence of which slots actually lapsed.
    async fn mark_missed_jobs(&self) -> Result<Vec<Job>, SchedulerError> {
        let mut store = self.store().lock().await;
        store.ensure_loaded(false)?;
        let now = self.now_ms();

        let mut due = Vec::new();
        for job in store.jobs_mut() {
            if job.is_due(now) {
                job.state.running_at_ms = Some(now);
                due.push(job.clone());
            }
        }
        if !due.is_empty() {
            store.persist()?;
        }
        drop(store);

        for job in &due {
            self.events().emit(SchedulerEvent::Started {
                job_id: job.id.clone(),
                name: job.name.clone(),
                at_ms: now,
            });
        }
        Ok(due)
    }
}
