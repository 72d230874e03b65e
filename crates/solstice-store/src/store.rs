//! File-backed job store.
//!
//! The store keeps an in-memory cache of the job collection and persists the
//! whole collection on every `persist()`. Saves go through a temp file and
//! rename so a crash mid-write never truncates the store. Callers serialize
//! all access through the scheduler's process-wide lock; nothing here is
//! internally synchronized.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::types::Job;

/// Durable collection of jobs.
pub struct JobStore {
    path: PathBuf,
    jobs: Vec<Job>,
    loaded: bool,
}

impl JobStore {
    /// Create a store backed by `path`. Nothing is read until
    /// [`ensure_loaded`](Self::ensure_loaded).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            jobs: Vec::new(),
            loaded: false,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the job collection from disk if not yet loaded, or re-read it
    /// when `force_reload` is set.
    ///
    /// Force-reloading before a mutation keeps external edits (an admin CLI
    /// touching the file while the scheduler runs) from being clobbered on
    /// the next persist. On the very first load of a process, stale
    /// `running_at_ms` marks are cleared: they cannot correspond to live
    /// work in this process, and clearing them lets recovery re-select
    /// those jobs.
    pub fn ensure_loaded(&mut self, force_reload: bool) -> Result<(), StoreError> {
        if self.loaded && !force_reload {
            return Ok(());
        }
        let first_load = !self.loaded;

        let jobs = match fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str::<Vec<Job>>(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no job store file yet, starting empty");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        self.jobs = jobs;
        if first_load {
            let mut stale = 0usize;
            for job in &mut self.jobs {
                if job.state.running_at_ms.take().is_some() {
                    stale += 1;
                }
            }
            if stale > 0 {
                info!(count = stale, "cleared stale running marks from previous process");
            }
            info!(count = self.jobs.len(), path = %self.path.display(), "loaded job store");
        }
        self.loaded = true;
        Ok(())
    }

    /// Write the whole collection to disk atomically (temp file + rename).
    pub fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.jobs)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            // Leave no temp file behind on a failed rename.
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(count = self.jobs.len(), "persisted job store");
        Ok(())
    }

    /// All jobs, in store order.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Mutable access for the scheduler's marking and outcome phases.
    pub fn jobs_mut(&mut self) -> &mut [Job] {
        &mut self.jobs
    }

    /// Get a job by id.
    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Get a mutable job by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// Add a new job. Fails if the id is already taken.
    pub fn add(&mut self, job: Job) -> Result<(), StoreError> {
        if self.jobs.iter().any(|j| j.id == job.id) {
            return Err(StoreError::JobExists(job.id));
        }
        self.jobs.push(job);
        Ok(())
    }

    /// Remove a job by id, returning it if present.
    pub fn remove(&mut self, id: &str) -> Option<Job> {
        let idx = self.jobs.iter().position(|j| j.id == id)?;
        Some(self.jobs.remove(idx))
    }

    /// Apply a mutation to one job.
    pub fn update<F>(&mut self, id: &str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Job),
    {
        match self.get_mut(id) {
            Some(job) => {
                f(job);
                Ok(())
            }
            None => Err(StoreError::JobNotFound(id.to_string())),
        }
    }

    /// Flip a job's enabled gate. Returns false if the job does not exist.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.get_mut(id) {
            Some(job) => {
                if job.enabled != enabled {
                    job.enabled = enabled;
                    if !enabled {
                        job.state.next_run_at_ms = None;
                    }
                }
                true
            }
            None => {
                warn!(job_id = %id, "set_enabled on unknown job");
                false
            }
        }
    }

    /// Number of jobs in the store.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the store holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Payload, Schedule};
    use pretty_assertions::assert_eq;

    fn test_job(name: &str) -> Job {
        Job::new(
            name,
            Schedule::Every { every_ms: 60_000 },
            Payload::SystemEvent {
                text: "ping".to_string(),
            },
            1_000,
        )
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JobStore::new(dir.path().join("jobs.json"));
        store.ensure_loaded(false).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let mut store = JobStore::new(&path);
        store.ensure_loaded(false).unwrap();
        let job = test_job("persisted");
        let id = job.id.clone();
        store.add(job).unwrap();
        store.persist().unwrap();

        let mut fresh = JobStore::new(&path);
        fresh.ensure_loaded(false).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh.get(&id).unwrap().name, "persisted");
    }

    #[test]
    fn test_first_load_clears_running_marks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let mut store = JobStore::new(&path);
        store.ensure_loaded(false).unwrap();
        let mut job = test_job("crashed");
        job.state.running_at_ms = Some(5_000);
        job.state.next_run_at_ms = Some(5_000);
        let id = job.id.clone();
        store.add(job).unwrap();
        store.persist().unwrap();

        // A new process sees the mark as stale and clears it.
        let mut fresh = JobStore::new(&path);
        fresh.ensure_loaded(false).unwrap();
        assert_eq!(fresh.get(&id).unwrap().state.running_at_ms, None);

        // But a force reload mid-process keeps live marks intact.
        fresh.get_mut(&id).unwrap().state.running_at_ms = Some(9_000);
        fresh.persist().unwrap();
        fresh.ensure_loaded(true).unwrap();
        assert_eq!(fresh.get(&id).unwrap().state.running_at_ms, Some(9_000));
    }

    #[test]
    fn test_force_reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let mut store = JobStore::new(&path);
        store.ensure_loaded(false).unwrap();
        store.add(test_job("one")).unwrap();
        store.persist().unwrap();

        // Simulate an admin CLI appending a job out-of-band.
        let mut external = JobStore::new(&path);
        external.ensure_loaded(false).unwrap();
        external.add(test_job("two")).unwrap();
        external.persist().unwrap();

        store.ensure_loaded(true).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JobStore::new(dir.path().join("jobs.json"));
        store.ensure_loaded(false).unwrap();
        let job = test_job("dup");
        let dup = job.clone();
        store.add(job).unwrap();
        assert!(matches!(store.add(dup), Err(StoreError::JobExists(_))));
    }

    #[test]
    fn test_remove_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JobStore::new(dir.path().join("jobs.json"));
        store.ensure_loaded(false).unwrap();
        let job = test_job("mutable");
        let id = job.id.clone();
        store.add(job).unwrap();

        store.update(&id, |j| j.name = "renamed".to_string()).unwrap();
        assert_eq!(store.get(&id).unwrap().name, "renamed");

        assert!(store.remove(&id).is_some());
        assert!(store.remove(&id).is_none());
        assert!(matches!(
            store.update(&id, |_| {}),
            Err(StoreError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_disable_clears_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JobStore::new(dir.path().join("jobs.json"));
        store.ensure_loaded(false).unwrap();
        let mut job = test_job("gated");
        job.state.next_run_at_ms = Some(10_000);
        let id = job.id.clone();
        store.add(job).unwrap();

        assert!(store.set_enabled(&id, false));
        assert_eq!(store.get(&id).unwrap().state.next_run_at_ms, None);
        assert!(!store.set_enabled("missing", false));
    }
}
