// src/worker/mod.rs

//! Worker side of the process boundary.
//!
//! A worker is this same executable started as `jobfleet worker <IN> <OUT>`.
//! It reads job envelopes, executes them with a [`JobExecutor`], and
//! replies with progress reports and one result per job.

pub mod executor;
pub mod serve;

use tokio::fs::{File, OpenOptions};

use crate::errors::{FleetError, Result};
use crate::exec::channel::{BoxReader, BoxWriter};
use crate::exec::launcher::STDIO_PIPE;
use crate::exec::Channel;

pub use executor::{JobExecutor, ModelExecutor, ProgressReporter};
pub use serve::serve;

/// Exit status for failures that are not a requested abort.
pub const EXIT_FAILURE: i32 = 2;

/// Open the worker's channel. `-` selects stdin/stdout; anything else is
/// a path (typically a FIFO the coordinator created).
pub async fn open_channel(inbound: &str, outbound: &str) -> Result<Channel> {
    let reader: BoxReader = if inbound == STDIO_PIPE {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(File::open(inbound).await?)
    };
    let writer: BoxWriter = if outbound == STDIO_PIPE {
        Box::new(tokio::io::stdout())
    } else {
        Box::new(OpenOptions::new().write(true).open(outbound).await?)
    };
    Ok(Channel::new(reader, writer))
}

/// Entry point of the `worker` subcommand. Returns the process exit code.
pub async fn run_worker_main(inbound: &str, outbound: &str) -> i32 {
    match run_worker(inbound, outbound).await {
        Ok(()) => 0,
        Err(FleetError::WorkerAbort { code, message }) => {
            eprintln!("jobfleet worker abort: {message}");
            code
        }
        Err(err) => {
            eprintln!("jobfleet worker error: {err}");
            EXIT_FAILURE
        }
    }
}

async fn run_worker(inbound: &str, outbound: &str) -> Result<()> {
    let mut channel = open_channel(inbound, outbound).await?;
    let executor = ModelExecutor::new()?;
    serve(&mut channel, &executor).await?;
    Ok(())
}
