// src/engine/controller.rs

//! Drives one run end to end: producer, pool, dispatchers, quiescence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dispatcher::{DispatchContext, Dispatcher};
use super::error_slot::ErrorSlot;
use super::progress::ProgressRegistry;
use super::queue::WorkQueue;
use super::{RunCompletion, RunEvent};
use crate::errors::{FleetError, Result};
use crate::exec::{EXIT_GRACE, LaunchedWorker, WorkerExit, WorkerHandle, WorkerLauncher, WorkerSupervisor};
use crate::job::JobSource;

/// Knobs for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of workers; already resolved, at least 1.
    pub workers: usize,
    pub job_timeout: Option<Duration>,
    pub reap_strays: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            job_timeout: None,
            reap_strays: true,
        }
    }
}

/// Owns the lifecycle of runs over one job source and one launcher.
pub struct RunController {
    source: JobSource,
    supervisor: WorkerSupervisor,
    options: RunOptions,
    registry: Arc<ProgressRegistry>,
    events: mpsc::UnboundedSender<RunEvent>,
    cancel: CancellationToken,
}

impl RunController {
    pub fn new(
        source: JobSource,
        launcher: Arc<dyn WorkerLauncher>,
        mut options: RunOptions,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> Self {
        if options.workers == 0 {
            warn!("a run needs at least one worker; using 1");
            options.workers = 1;
        }
        let supervisor = WorkerSupervisor::new(launcher, options.reap_strays);
        Self {
            source,
            supervisor,
            options,
            registry: Arc::new(ProgressRegistry::new()),
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Live view of the jobs currently executing.
    pub fn registry(&self) -> Arc<ProgressRegistry> {
        Arc::clone(&self.registry)
    }

    /// Token that aborts the current run, or the next one if no run is in
    /// flight. Every run that ends arms a fresh token, so a cancelled run
    /// never leaks into the following one.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Kill every worker of the current run; it then winds down and
    /// reports normally.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Execute every job of the source and wait until the pool is quiet.
    ///
    /// Always returns; fatal problems end up in
    /// [`RunCompletion::error`], per-job failures only on their
    /// [`RunEvent::JobCompleted`] events.
    pub async fn run(&mut self) -> RunCompletion {
        let started = Instant::now();
        info!(workers = self.options.workers, "run starting");

        let queue = Arc::new(WorkQueue::new());
        let errors = Arc::new(ErrorSlot::new());
        self.registry.clear();
        self.supervisor.reset(&self.cancel);

        // A panicking provider is recorded as soon as it happens; `fill`
        // still marks the queue done, so dispatchers drain what was
        // enqueued and the pool reaches quiescence.
        let producer = {
            let source = self.source.clone();
            let queue = Arc::clone(&queue);
            let errors = Arc::clone(&errors);
            tokio::spawn(async move {
                match tokio::task::spawn_blocking(move || source.fill(&queue)).await {
                    Ok(count) => Some(count),
                    Err(e) => {
                        error!(error = %e, "job producer panicked");
                        errors.record_error(&FleetError::Other(anyhow::anyhow!("job producer failed: {e}")));
                        None
                    }
                }
            })
        };

        let reaped = self.supervisor.clear_strays().await;
        if reaped > 0 {
            info!(reaped, "removed stray workers from an earlier run");
        }

        let workers = match self.supervisor.start_pool(self.options.workers).await {
            Ok(workers) => workers,
            Err(e) => {
                errors.record_error(&e);
                Vec::new()
            }
        };

        let ctx = Arc::new(
            DispatchContext::new(
                Arc::clone(&queue),
                Arc::clone(&self.registry),
                Arc::clone(&errors),
                self.events.clone(),
            )
            .with_job_timeout(self.options.job_timeout),
        );

        let (live_tx, mut live_rx) = watch::channel(workers.len());
        let live_tx = Arc::new(live_tx);
        for worker in workers {
            let ctx = Arc::clone(&ctx);
            let live = Arc::clone(&live_tx);
            let stop = self.supervisor.stop_token();
            tokio::spawn(async move {
                observe_worker(worker, &ctx, stop).await;
                live.send_modify(|n| *n = n.saturating_sub(1));
            });
        }

        // Quiescence: every worker has exited, whether or not the queue
        // drained. The sender is held above, so this cannot fail.
        let _ = live_rx.wait_for(|live| *live == 0).await;
        debug!("worker pool quiescent");

        if self.cancel.is_cancelled() {
            errors.record_error(&FleetError::Cancelled);
        }
        self.supervisor.stop_pool();

        match producer.await {
            Ok(Some(count)) => debug!(enqueued = count, left = queue.len(), "producer joined"),
            Ok(None) => debug!(left = queue.len(), "producer failed"),
            Err(e) => {
                error!(error = %e, "job producer task failed");
                errors.record_error(&FleetError::Other(anyhow::anyhow!("job producer failed: {e}")));
            }
        }

        self.registry.clear();
        self.cancel = CancellationToken::new();

        let completion = RunCompletion {
            elapsed: started.elapsed(),
            jobs_completed: ctx.jobs_completed(),
            error: errors.get().cloned(),
        };
        match &completion.error {
            None => info!(
                jobs = completion.jobs_completed,
                elapsed = ?completion.elapsed,
                "run completed"
            ),
            Some(failure) => warn!(
                jobs = completion.jobs_completed,
                elapsed = ?completion.elapsed,
                error = %failure,
                "run completed with error"
            ),
        }

        let _ = self.events.send(RunEvent::RunCompleted(completion.clone()));
        completion
    }
}

enum SlotOutcome {
    Finished(Result<usize>),
    Exited(Result<WorkerExit>),
    Stopped,
}

/// Drive one worker's dispatcher and observe the worker's exit.
///
/// The worker is always gone when this returns. At most one error is
/// offered to the error slot per worker; a crash (non-zero exit plus the
/// worker's stderr) is preferred over the disconnect the dispatcher saw
/// for the same worker.
async fn observe_worker(worker: LaunchedWorker, ctx: &Arc<DispatchContext>, stop: CancellationToken) {
    let LaunchedWorker {
        slot,
        channel,
        mut handle,
    } = worker;
    let mut dispatcher = Dispatcher::new(slot, channel, Arc::clone(ctx));

    let outcome = tokio::select! {
        res = dispatcher.run() => SlotOutcome::Finished(res),
        exit = handle.wait() => SlotOutcome::Exited(exit),
        _ = stop.cancelled() => SlotOutcome::Stopped,
    };
    dispatcher.abandon_current();
    // Closing the channel is the worker's signal to exit.
    drop(dispatcher);

    match outcome {
        SlotOutcome::Finished(Ok(handled)) => {
            debug!(slot, handled, "dispatcher finished");
            if let Some(exit) = settle(handle.as_mut(), slot).await {
                if !exit.success() {
                    let crash = crash_error(handle.as_mut(), slot, exit).await;
                    ctx.errors.record_error(&crash);
                }
            }
        }
        SlotOutcome::Finished(Err(e)) if e.is_disconnect() => match settle(handle.as_mut(), slot).await {
            Some(exit) if !exit.success() => {
                let crash = crash_error(handle.as_mut(), slot, exit).await;
                ctx.errors.record_error(&crash);
            }
            _ => {
                ctx.errors.record_error(&e);
            }
        },
        SlotOutcome::Finished(Err(e)) => {
            ctx.errors.record_error(&e);
            kill(handle.as_mut(), slot).await;
        }
        SlotOutcome::Exited(Ok(exit)) => {
            let crash = crash_error(handle.as_mut(), slot, exit).await;
            ctx.errors.record_error(&crash);
        }
        SlotOutcome::Exited(Err(e)) => {
            ctx.errors.record_error(&e);
            kill(handle.as_mut(), slot).await;
        }
        SlotOutcome::Stopped => {
            info!(slot, "pool stopped; killing worker");
            kill(handle.as_mut(), slot).await;
            ctx.errors.record_error(&FleetError::Cancelled);
        }
    }
}

/// Wait for a worker whose channel is closed to exit on its own, killing
/// it after the grace period. `None` if it had to be killed.
async fn settle(handle: &mut dyn WorkerHandle, slot: usize) -> Option<WorkerExit> {
    match tokio::time::timeout(EXIT_GRACE, handle.wait()).await {
        Ok(Ok(exit)) => {
            debug!(slot, %exit, "worker exited");
            Some(exit)
        }
        Ok(Err(e)) => {
            warn!(slot, error = %e, "waiting for worker failed");
            kill(handle, slot).await;
            None
        }
        Err(_) => {
            warn!(slot, grace = ?EXIT_GRACE, "worker ignored channel close; killing");
            kill(handle, slot).await;
            None
        }
    }
}

async fn kill(handle: &mut dyn WorkerHandle, slot: usize) {
    if let Err(e) = handle.kill().await {
        warn!(slot, error = %e, "failed to kill worker");
    }
    let _ = handle.wait().await;
}

async fn crash_error(handle: &mut dyn WorkerHandle, slot: usize, exit: WorkerExit) -> FleetError {
    let pid = handle
        .pid()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    let diagnostics = handle.diagnostics().await;

    let mut message = if exit.success() {
        format!("worker {slot} (pid {pid}) exited before its dispatcher finished")
    } else {
        format!("worker {slot} (pid {pid}) crashed with {exit}")
    };
    if !diagnostics.is_empty() {
        message.push_str("; stderr:\n");
        message.push_str(&diagnostics);
    }
    FleetError::WorkerCrash(message)
}
