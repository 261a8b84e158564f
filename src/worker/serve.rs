// src/worker/serve.rs

//! The worker's request loop.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::executor::{JobExecutor, ProgressReporter};
use crate::errors::{FleetError, Result};
use crate::exec::{Channel, Envelope, ResultMessage};

/// Serve jobs until the coordinator closes the channel.
///
/// Returns the number of jobs handled on a clean EOF. A message other
/// than `job`, a broken channel, or a worker abort from the executor ends
/// the loop with an error.
pub async fn serve(channel: &mut Channel, executor: &dyn JobExecutor) -> Result<usize> {
    let mut handled = 0usize;

    loop {
        let job = match channel.recv().await? {
            None => {
                info!(handled, "coordinator closed channel; worker exiting");
                return Ok(handled);
            }
            Some(Envelope::Job { job }) => job,
            Some(other) => {
                return Err(FleetError::Protocol(format!(
                    "worker expected a job, got {}",
                    other.kind_name()
                )));
            }
        };

        let name = job.name.clone();
        debug!(job = %name, "job received");

        let result = run_one(channel, executor, job).await?;
        if let Some(ref err) = result.error {
            warn!(job = %name, error = %err, "job failed");
        }
        channel.send(&Envelope::Result(result)).await?;
        handled += 1;
    }
}

/// Execute one job, forwarding its progress reports as they come. All
/// reports are on the wire before this returns.
async fn run_one(
    channel: &mut Channel,
    executor: &dyn JobExecutor,
    job: crate::job::ModelNode,
) -> Result<ResultMessage> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let exec = executor.execute(job, ProgressReporter::new(tx));
    tokio::pin!(exec);

    let outcome = loop {
        tokio::select! {
            biased;
            Some(progress) = rx.recv() => {
                channel.send(&Envelope::ProgressReport { progress }).await?;
            }
            res = &mut exec => break res,
        }
    };

    while let Ok(progress) = rx.try_recv() {
        channel.send(&Envelope::ProgressReport { progress }).await?;
    }

    match outcome {
        Ok(result) => Ok(result),
        Err(abort @ FleetError::WorkerAbort { .. }) => Err(abort),
        Err(e) => Ok(ResultMessage::failed(e.to_string())),
    }
}
