// src/engine/queue.rs

//! Multi-consumer FIFO between the job producer and the dispatchers.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use tokio::sync::Notify;
use tracing::{trace, warn};

use crate::job::Job;

/// Unbounded work queue with an explicit "producer done" signal.
///
/// Semantics:
/// - `enqueue` never blocks.
/// - Concurrent `try_dequeue` calls never return the same job twice and
///   never lose one (crossbeam's MPMC channel guarantees both).
/// - `is_drained` is true once the producer is done AND the queue is
///   empty. An empty but not drained queue means "poll again".
#[derive(Debug)]
pub struct WorkQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    producer_done: AtomicBool,
    wake: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            producer_done: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Producer-only.
    pub fn enqueue(&self, job: Job) {
        if self.producer_done.load(Ordering::Acquire) {
            warn!(job = %job.id, "enqueue after producer signalled done");
        }
        // Cannot fail: the queue owns a receiver for its whole lifetime.
        let _ = self.tx.send(job);
        self.wake.notify_waiters();
    }

    pub fn try_dequeue(&self) -> Option<Job> {
        match self.rx.try_recv() {
            Ok(job) => Some(job),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn mark_producer_done(&self) {
        self.producer_done.store(true, Ordering::Release);
        self.wake.notify_waiters();
    }

    pub fn is_producer_done(&self) -> bool {
        self.producer_done.load(Ordering::Acquire)
    }

    pub fn is_drained(&self) -> bool {
        self.is_producer_done() && self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Wait for the next job; `None` once the queue is drained.
    ///
    /// Parks on a wake-up signal between attempts instead of spinning. The
    /// waiter is registered before the queue is checked, so an enqueue
    /// racing with the check is never missed.
    pub async fn next_job(&self) -> Option<Job> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_dequeue() {
                return Some(job);
            }
            if self.is_drained() {
                trace!("work queue drained");
                return None;
            }

            notified.await;
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
