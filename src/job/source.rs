// src/job/source.rs

//! Ordered stream of jobs drawn from one or more providers.

use std::sync::Arc;

use tracing::{debug, info};

use super::Job;
use super::provider::JobProvider;
use crate::engine::queue::WorkQueue;
use crate::types::JobId;

/// Merges providers, in order, into a single job stream and assigns each
/// job its identity. A pure producer: no concurrency control of its own.
#[derive(Clone, Default)]
pub struct JobSource {
    providers: Vec<Arc<dyn JobProvider>>,
}

impl JobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn JobProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Iterate every job of every provider, in provider order.
    pub fn jobs(&self) -> impl Iterator<Item = Job> + '_ {
        self.providers
            .iter()
            .flat_map(|provider| {
                let provider_name = provider.name().to_string();
                provider.jobs().map(move |pj| (provider_name.clone(), pj))
            })
            .enumerate()
            .map(|(idx, (provider, pj))| Job {
                id: JobId::new(idx as u64 + 1),
                name: pj.name,
                provider,
                runnable: pj.runnable,
                sink: pj.sink,
            })
    }

    /// Enqueue every job, then signal that no more will arrive. Returns
    /// the number of jobs enqueued.
    ///
    /// The queue is marked done even if a provider panics mid-iteration,
    /// so dispatchers never wait on a producer that is gone.
    pub fn fill(&self, queue: &WorkQueue) -> usize {
        let _done = ProducerDone(queue);
        let mut count = 0;
        for job in self.jobs() {
            debug!(job = %job.id, name = %job.name, provider = %job.provider, "enqueue");
            queue.enqueue(job);
            count += 1;
        }
        info!(jobs = count, providers = self.providers.len(), "job source exhausted");
        count
    }
}

struct ProducerDone<'a>(&'a WorkQueue);

impl Drop for ProducerDone<'_> {
    fn drop(&mut self) {
        self.0.mark_producer_done();
    }
}
