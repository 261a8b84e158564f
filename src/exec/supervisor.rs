// src/exec/supervisor.rs

//! Worker pool lifecycle: sizing, stray cleanup, start and stop.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::launcher::{LaunchedWorker, WorkerLauncher};
use super::reaper;
use crate::errors::{FleetError, Result};

/// Environment variable that overrides the automatic worker count.
pub const PROCESSORS_ENV: &str = "JOBFLEET_PROCESSORS";

/// Worker count precedence: an explicit positive value, then a positive
/// integer in `env`, then one less than the detected CPU count (at least 1).
pub fn resolve_worker_count(explicit: Option<usize>, env: Option<&str>, detected: usize) -> usize {
    if let Some(n) = explicit.filter(|n| *n > 0) {
        return n;
    }
    if let Some(n) = env
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
    {
        return n;
    }
    detected.saturating_sub(1).max(1)
}

/// [`resolve_worker_count`] against the live environment and CPU count.
pub fn worker_count(explicit: Option<usize>) -> usize {
    let env = std::env::var(PROCESSORS_ENV).ok();
    resolve_worker_count(explicit, env.as_deref(), num_cpus::get())
}

/// Starts and stops the worker pool for one run.
pub struct WorkerSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    reap_strays: bool,
    stop: CancellationToken,
}

impl WorkerSupervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, reap_strays: bool) -> Self {
        Self {
            launcher,
            reap_strays,
            stop: CancellationToken::new(),
        }
    }

    /// Token that fires when the pool is stopped. Every per-worker
    /// observer watches it and kills its worker when it fires.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Arm a fresh stop token for a new run. The new token is a child of
    /// `parent`, so cancelling the run also stops the pool.
    pub fn reset(&mut self, parent: &CancellationToken) {
        self.stop = parent.child_token();
    }

    /// Kill orphaned workers of our executable, if enabled. The process
    /// table scan runs on the blocking pool.
    pub async fn clear_strays(&self) -> usize {
        if !self.reap_strays {
            return 0;
        }
        let Some(exe) = self.launcher.worker_exe().map(Path::to_path_buf) else {
            return 0;
        };
        match tokio::task::spawn_blocking(move || reaper::reap_strays(&exe)).await {
            Ok(reaped) => reaped,
            Err(e) => {
                warn!(error = %e, "stray worker scan failed");
                0
            }
        }
    }

    /// Spawn exactly `n` workers.
    ///
    /// If any launch fails, or the pool is stopped mid-launch, the workers
    /// started so far are killed and the error is returned.
    pub async fn start_pool(&self, n: usize) -> Result<Vec<LaunchedWorker>> {
        let mut workers = Vec::with_capacity(n);

        for slot in 0..n {
            let launched = tokio::select! {
                res = self.launcher.launch(slot) => res,
                _ = self.stop.cancelled() => Err(FleetError::Cancelled),
            };
            match launched {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    warn!(slot, error = %e, "worker launch failed; tearing down partial pool");
                    for mut worker in workers {
                        let _ = worker.handle.kill().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(workers = n, "worker pool started");
        Ok(workers)
    }

    /// Forcibly terminate every worker of the current pool. Idempotent.
    pub fn stop_pool(&self) {
        if !self.stop.is_cancelled() {
            debug!("stopping worker pool");
            self.stop.cancel();
        }
    }
}
