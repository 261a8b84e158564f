// tests/queue_properties.rs

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use jobfleet::engine::WorkQueue;
use jobfleet::job::Job;
use jobfleet::job::Runnable;
use jobfleet::types::JobId;

fn job(n: u64) -> Job {
    Job::new(JobId::new(n), format!("j{n}"), "prop", Runnable::Noop)
}

/// Drain `queue` from `consumers` threads while the producer is still
/// enqueueing; returns every id seen, per consumer.
fn concurrent_drain(jobs: u64, consumers: usize) -> Vec<Vec<u64>> {
    let queue = Arc::new(WorkQueue::new());
    let barrier = Arc::new(Barrier::new(consumers + 1));

    let handles: Vec<_> = (0..consumers)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut seen = Vec::new();
                loop {
                    match queue.try_dequeue() {
                        Some(job) => seen.push(job.id.as_u64()),
                        None if queue.is_drained() => break,
                        None => thread::yield_now(),
                    }
                }
                seen
            })
        })
        .collect();

    barrier.wait();
    for n in 1..=jobs {
        queue.enqueue(job(n));
    }
    queue.mark_producer_done();

    let per_consumer: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // After done + empty, every further call reports no work.
    assert!(queue.is_drained());
    assert!(queue.try_dequeue().is_none());
    per_consumer
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_consumers_never_duplicate_or_lose_jobs(
        jobs in 0u64..300,
        consumers in 1usize..6,
    ) {
        let per_consumer = concurrent_drain(jobs, consumers);

        let all: Vec<u64> = per_consumer.iter().flatten().copied().collect();
        let unique: HashSet<u64> = all.iter().copied().collect();
        prop_assert_eq!(all.len(), jobs as usize);
        prop_assert_eq!(unique.len(), jobs as usize);

        // Each consumer sees jobs in FIFO order.
        for seen in &per_consumer {
            prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
