pub mod builders;
pub mod fake_launcher;

use std::sync::Once;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use jobfleet::engine::{JobCompletion, RunCompletion, RunEvent};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 10-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// Everything a run emitted, split by kind.
#[derive(Debug, Default)]
pub struct RecordedEvents {
    pub jobs: Vec<JobCompletion>,
    pub runs: Vec<RunCompletion>,
}

impl RecordedEvents {
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.jobs.iter().map(|j| j.name.clone()).collect();
        names.sort();
        names
    }

    pub fn failed_jobs(&self) -> Vec<&JobCompletion> {
        self.jobs.iter().filter(|j| j.error.is_some()).collect()
    }
}

/// Drain every event already sent on `rx` without waiting.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<RunEvent>) -> RecordedEvents {
    let mut recorded = RecordedEvents::default();
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::JobCompleted(job) => recorded.jobs.push(job),
            RunEvent::RunCompleted(run) => recorded.runs.push(run),
        }
    }
    recorded
}
