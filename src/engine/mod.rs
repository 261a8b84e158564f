// src/engine/mod.rs

//! Orchestration engine for jobfleet.
//!
//! This module ties together:
//! - the work queue between the producer and the dispatchers
//! - one dispatcher per worker, driving its channel job by job
//! - the progress registry and the first-error slot shared by dispatchers
//! - the run controller that starts everything and waits for quiescence
//!
//! Consumers observe a run through [`RunEvent`]s.

use std::time::{Duration, SystemTime};

use crate::errors::RunFailure;
use crate::types::JobId;

/// One finished job, as reported to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub id: JobId,
    pub name: String,
    pub provider: String,
    pub started_at: SystemTime,
    pub elapsed: Duration,
    /// Per-job failure; never fatal to the run.
    pub error: Option<String>,
}

impl JobCompletion {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The end of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub elapsed: Duration,
    pub jobs_completed: usize,
    /// First fatal error observed, if any.
    pub error: Option<RunFailure>,
}

impl RunCompletion {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Events emitted while a run progresses.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    JobCompleted(JobCompletion),
    /// Always the last event of a run.
    RunCompleted(RunCompletion),
}

pub mod controller;
pub mod dispatcher;
pub mod error_slot;
pub mod progress;
pub mod queue;

pub use controller::{RunController, RunOptions};
pub use dispatcher::{DispatchContext, Dispatcher, DispatcherState};
pub use error_slot::ErrorSlot;
pub use progress::{ProgressRegistry, RunningEntry};
pub use queue::WorkQueue;
