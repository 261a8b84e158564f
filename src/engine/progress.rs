// src/engine/progress.rs

//! Shared view of currently executing jobs and their last-known progress.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::job::Job;
use crate::types::JobId;

/// Progress proxy for one executing job.
///
/// The job itself stays read-only with respect to progress; the entry is
/// the mutable stand-in used for monitoring and is discarded the moment
/// the job's result arrives.
#[derive(Debug, Clone)]
pub struct RunningEntry {
    pub id: JobId,
    pub name: String,
    pub provider: String,
    pub progress: f64,
    pub job: Arc<Job>,
}

impl RunningEntry {
    pub fn new(job: Arc<Job>) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            provider: job.provider.clone(),
            progress: 0.0,
            job,
        }
    }
}

/// Mutex-guarded registry of running entries, keyed by job id.
///
/// The lock is held only for the duration of a single add/update/remove
/// or snapshot.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    entries: Mutex<BTreeMap<JobId, RunningEntry>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<JobId, RunningEntry>> {
        // A poisoned lock only means another dispatcher panicked mid-update;
        // the map itself is still consistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a job. Returns false if an entry for it already exists.
    pub fn add(&self, entry: RunningEntry) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(&entry.id) {
            return false;
        }
        trace!(job = %entry.id, "progress entry added");
        entries.insert(entry.id, entry);
        true
    }

    /// Record a progress value, clamped to `[0, 1]`. Unknown ids are
    /// ignored so late reports can never resurrect a finished job.
    pub fn update(&self, id: JobId, progress: f64) -> bool {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        match self.lock().get_mut(&id) {
            Some(entry) => {
                entry.progress = progress;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: JobId) -> Option<RunningEntry> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: JobId) -> Option<RunningEntry> {
        self.lock().get(&id).cloned()
    }

    pub fn snapshot(&self) -> Vec<RunningEntry> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
