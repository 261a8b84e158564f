// src/engine/dispatcher.rs

//! Per-worker state machine: draw a job, ship it, collect its result.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::error_slot::ErrorSlot;
use super::progress::{ProgressRegistry, RunningEntry};
use super::queue::WorkQueue;
use super::{JobCompletion, RunEvent};
use crate::errors::{FleetError, Result};
use crate::exec::{Channel, Envelope, ResultMessage};
use crate::job::{Job, materialize};
use crate::types::JobId;

/// Where a dispatcher is in its cycle.
///
/// `Idle → Drawing → Sending → AwaitingResponse → Completing → Idle`,
/// with `Stopped` terminal once the queue is drained or a channel failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Drawing,
    Sending,
    AwaitingResponse,
    Completing,
    Stopped,
}

/// Run-scoped state shared by every dispatcher of one run.
pub struct DispatchContext {
    pub queue: Arc<WorkQueue>,
    pub registry: Arc<ProgressRegistry>,
    pub errors: Arc<ErrorSlot>,
    pub events: mpsc::UnboundedSender<RunEvent>,
    pub jobs_completed: AtomicUsize,
    pub job_timeout: Option<Duration>,
}

impl DispatchContext {
    pub fn new(
        queue: Arc<WorkQueue>,
        registry: Arc<ProgressRegistry>,
        errors: Arc<ErrorSlot>,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> Self {
        Self {
            queue,
            registry,
            errors,
            events,
            jobs_completed: AtomicUsize::new(0),
            job_timeout: None,
        }
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn jobs_completed(&self) -> usize {
        self.jobs_completed.load(Ordering::Acquire)
    }
}

pub struct Dispatcher {
    slot: usize,
    channel: Channel,
    ctx: Arc<DispatchContext>,
    state: DispatcherState,
    current: Option<JobId>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("slot", &self.slot)
            .field("state", &self.state)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(slot: usize, channel: Channel, ctx: Arc<DispatchContext>) -> Self {
        Self {
            slot,
            channel,
            ctx,
            state: DispatcherState::Idle,
            current: None,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Process jobs until the queue is drained. Returns the number of jobs
    /// this dispatcher completed.
    ///
    /// Any channel failure stops the dispatcher and is returned to the
    /// caller, which decides how it is recorded. There is no retry: the
    /// failed job is dropped along with its running entry.
    pub async fn run(&mut self) -> Result<usize> {
        let mut handled = 0usize;

        loop {
            self.state = DispatcherState::Drawing;
            let Some(job) = self.ctx.queue.next_job().await else {
                debug!(slot = self.slot, handled, "queue drained; dispatcher stopping");
                self.state = DispatcherState::Stopped;
                return Ok(handled);
            };

            if let Err(e) = self.process(job).await {
                warn!(slot = self.slot, error = %e, "dispatcher failed");
                self.abandon_current();
                self.state = DispatcherState::Stopped;
                return Err(e);
            }

            handled += 1;
            self.state = DispatcherState::Idle;
        }
    }

    /// Drop the running entry of an in-flight job, if any. Used when the
    /// dispatcher fails or its future is abandoned mid-job.
    pub fn abandon_current(&mut self) {
        if let Some(id) = self.current.take() {
            trace!(slot = self.slot, job = %id, "abandoning in-flight job");
            self.ctx.registry.remove(id);
        }
        self.state = DispatcherState::Stopped;
    }

    async fn process(&mut self, job: Job) -> Result<()> {
        let job = Arc::new(job);
        let started_at = SystemTime::now();
        let started = Instant::now();

        if !job.is_noop() {
            self.ctx.registry.add(RunningEntry::new(Arc::clone(&job)));
        }
        self.current = Some(job.id);
        debug!(slot = self.slot, job = %job.id, name = %job.name, "dispatching job");

        let snapshot = materialize(&job);

        let result = match self.ctx.job_timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(&job, snapshot))
                .await
                .map_err(|_| FleetError::Timeout {
                    job: job.name.clone(),
                    elapsed: started.elapsed(),
                })??,
            None => self.exchange(&job, snapshot).await?,
        };

        self.state = DispatcherState::Completing;
        self.complete(&job, result, started_at, started.elapsed());
        Ok(())
    }

    async fn exchange(&mut self, job: &Job, snapshot: crate::job::ModelNode) -> Result<ResultMessage> {
        self.state = DispatcherState::Sending;
        self.channel.send(&Envelope::Job { job: snapshot }).await?;

        self.state = DispatcherState::AwaitingResponse;
        let registry = Arc::clone(&self.ctx.registry);
        let id = job.id;
        self.channel
            .await_result(move |progress| {
                registry.update(id, progress);
            })
            .await
    }

    fn complete(&mut self, job: &Job, result: ResultMessage, started_at: SystemTime, elapsed: Duration) {
        let mut error = result.error;

        if let Some(sink) = &job.sink {
            let written = result
                .report_tables
                .iter()
                .try_for_each(|t| sink.write_report_table(&job.name, t))
                .and_then(|_| {
                    result
                        .data_tables
                        .iter()
                        .try_for_each(|t| sink.write_data_table(&job.name, t))
                });
            if let Err(e) = written {
                warn!(job = %job.id, error = %e, "writing job results failed");
                error.get_or_insert_with(|| e.to_string());
            }
        }

        self.ctx.registry.remove(job.id);
        self.current = None;

        if let Some(ref err) = error {
            warn!(job = %job.id, name = %job.name, error = %err, "job failed");
        } else {
            debug!(job = %job.id, name = %job.name, ?elapsed, "job completed");
        }

        self.ctx.jobs_completed.fetch_add(1, Ordering::AcqRel);
        // The consumer may have stopped listening; the run carries on.
        let _ = self.ctx.events.send(RunEvent::JobCompleted(JobCompletion {
            id: job.id,
            name: job.name.clone(),
            provider: job.provider.clone(),
            started_at,
            elapsed,
            error,
        }));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::duplex;

    use super::*;
    use crate::errors::ErrorKind;
    use crate::job::{ModelJob, ModelNode, Runnable, kinds};
    use crate::sink::{MemorySink, ResultSink};
    use crate::types::Table;

    fn pair() -> (Channel, Channel) {
        let (a_tx, b_rx) = duplex(4096);
        let (b_tx, a_rx) = duplex(4096);
        (
            Channel::new(Box::new(a_rx), Box::new(a_tx)),
            Channel::new(Box::new(b_rx), Box::new(b_tx)),
        )
    }

    fn ctx() -> (Arc<DispatchContext>, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = DispatchContext::new(
            Arc::new(WorkQueue::new()),
            Arc::new(ProgressRegistry::new()),
            Arc::new(ErrorSlot::new()),
            tx,
        );
        (Arc::new(ctx), rx)
    }

    fn model_job(n: u64) -> Job {
        let node = ModelNode::new(format!("j{n}"), kinds::SIMULATION);
        Job::new(JobId::new(n), format!("j{n}"), "test", Runnable::Model(ModelJob { node, tree: None }))
    }

    /// Scripted worker: answers each job with two progress reports and a
    /// result carrying one report table.
    async fn scripted_worker(mut chan: Channel) {
        while let Ok(Some(Envelope::Job { .. })) = chan.recv().await {
            chan.send(&Envelope::ProgressReport { progress: 0.5 }).await.unwrap();
            chan.send(&Envelope::ProgressReport { progress: 1.0 }).await.unwrap();
            chan.send(&Envelope::Result(ResultMessage {
                error: None,
                report_tables: vec![Table::new("Summary")],
                data_tables: vec![],
            }))
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn completes_jobs_and_writes_sink() {
        let (ctx, mut events) = ctx();
        let sink = Arc::new(MemorySink::new());
        for n in 1..=3 {
            ctx.queue.enqueue(model_job(n).with_sink(sink.clone() as Arc<dyn ResultSink>));
        }
        ctx.queue.mark_producer_done();

        let (coord, worker) = pair();
        let peer = tokio::spawn(scripted_worker(worker));

        let mut dispatcher = Dispatcher::new(0, coord, Arc::clone(&ctx));
        assert_eq!(dispatcher.run().await.unwrap(), 3);
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        drop(dispatcher);
        peer.await.unwrap();

        let mut ids = Vec::new();
        while let Ok(RunEvent::JobCompleted(c)) = events.try_recv() {
            assert!(c.is_success());
            ids.push(c.id.as_u64());
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(sink.len(), 3);
        assert!(ctx.registry.is_empty());
        assert_eq!(ctx.jobs_completed(), 3);
    }

    /// Poll until the registry shows `want` for `id`.
    async fn registry_reaches(registry: &ProgressRegistry, id: JobId, want: f64) -> f64 {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(entry) = registry.get(id) {
                    if (entry.progress - want).abs() < 1e-9 {
                        return entry.progress;
                    }
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("registry never showed the reported progress")
    }

    #[tokio::test]
    async fn progress_is_tracked_until_the_result_and_not_after() {
        let (ctx, mut events) = ctx();
        ctx.queue.enqueue(model_job(1));
        ctx.queue.mark_producer_done();
        let id = JobId::new(1);

        let (coord, mut worker) = pair();
        let dispatcher = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                let mut dispatcher = Dispatcher::new(0, coord, ctx);
                dispatcher.run().await
            })
        };

        let env = worker.recv().await.unwrap().unwrap();
        assert_eq!(env.kind_name(), "job");

        let mut seen = vec![registry_reaches(&ctx.registry, id, 0.0).await];
        for (reported, shown) in [(0.25, 0.25), (0.6, 0.6), (1.4, 1.0)] {
            worker.send(&Envelope::ProgressReport { progress: reported }).await.unwrap();
            seen.push(registry_reaches(&ctx.registry, id, shown).await);
        }
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)), "{seen:?}");

        worker.send(&Envelope::Result(ResultMessage::default())).await.unwrap();
        match events.recv().await {
            Some(RunEvent::JobCompleted(c)) => assert_eq!(c.id, id),
            other => panic!("unexpected {other:?}"),
        }
        assert!(ctx.registry.get(id).is_none());
        assert!(ctx.registry.is_empty());

        drop(worker);
        assert_eq!(dispatcher.await.unwrap().unwrap(), 1);
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn noop_jobs_are_not_tracked() {
        let (ctx, mut events) = ctx();
        ctx.queue.enqueue(Job::new(JobId::new(1), "filler", "test", Runnable::Noop));
        ctx.queue.mark_producer_done();

        let (coord, mut worker) = pair();
        let registry = Arc::clone(&ctx.registry);
        let peer = tokio::spawn(async move {
            let env = worker.recv().await.unwrap().unwrap();
            assert_eq!(env.kind_name(), "job");
            assert!(registry.is_empty());
            worker.send(&Envelope::Result(ResultMessage::default())).await.unwrap();
            let _ = worker.recv().await;
        });

        let mut dispatcher = Dispatcher::new(0, coord, Arc::clone(&ctx));
        assert_eq!(dispatcher.run().await.unwrap(), 1);
        drop(dispatcher);
        peer.await.unwrap();
        assert!(matches!(events.try_recv(), Ok(RunEvent::JobCompleted(_))));
    }

    #[tokio::test]
    async fn worker_disconnect_stops_dispatcher_and_drops_entry() {
        let (ctx, mut events) = ctx();
        ctx.queue.enqueue(model_job(1));
        ctx.queue.enqueue(model_job(2));
        ctx.queue.mark_producer_done();

        let (coord, mut worker) = pair();
        let peer = tokio::spawn(async move {
            let _ = worker.recv().await;
            worker.send(&Envelope::ProgressReport { progress: 0.3 }).await.unwrap();
        });

        let mut dispatcher = Dispatcher::new(0, coord, Arc::clone(&ctx));
        let err = dispatcher.run().await.unwrap_err();
        peer.await.unwrap();

        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
        assert_eq!(dispatcher.state(), DispatcherState::Stopped);
        assert!(ctx.registry.is_empty());
        assert!(events.try_recv().is_err());
        // the second job is left for other dispatchers
        assert_eq!(ctx.queue.len(), 1);
    }

    #[tokio::test]
    async fn per_job_timeout_fails_the_dispatcher() {
        let (tx, _events) = mpsc::unbounded_channel();
        let ctx = Arc::new(
            DispatchContext::new(
                Arc::new(WorkQueue::new()),
                Arc::new(ProgressRegistry::new()),
                Arc::new(ErrorSlot::new()),
                tx,
            )
            .with_job_timeout(Some(Duration::from_millis(50))),
        );
        ctx.queue.enqueue(model_job(1));
        ctx.queue.mark_producer_done();

        let (coord, mut worker) = pair();
        let peer = tokio::spawn(async move {
            let _ = worker.recv().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let mut dispatcher = Dispatcher::new(0, coord, Arc::clone(&ctx));
        let err = dispatcher.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(ctx.registry.is_empty());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn per_job_error_is_on_the_event_only() {
        let (ctx, mut events) = ctx();
        let node = ModelNode::new("j1", kinds::SIMULATION).with_property("fail", json!("x"));
        ctx.queue.enqueue(Job::new(
            JobId::new(1),
            "j1",
            "test",
            Runnable::Model(ModelJob { node, tree: None }),
        ));
        ctx.queue.mark_producer_done();

        let (coord, mut worker) = pair();
        let peer = tokio::spawn(async move {
            while let Ok(Some(_)) = worker.recv().await {
                worker
                    .send(&Envelope::Result(ResultMessage::failed("bad input")))
                    .await
                    .unwrap();
            }
        });

        let mut dispatcher = Dispatcher::new(0, coord, Arc::clone(&ctx));
        dispatcher.run().await.unwrap();
        drop(dispatcher);
        peer.await.unwrap();

        match events.try_recv() {
            Ok(RunEvent::JobCompleted(c)) => assert_eq!(c.error.as_deref(), Some("bad input")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!ctx.errors.is_set());
    }
}
