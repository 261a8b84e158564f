// src/worker/executor.rs

//! What a worker actually does with a job.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::{Value as JsonValue, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{FleetError, Result};
use crate::exec::ResultMessage;
use crate::job::ModelNode;
use crate::types::{ColumnType, Table};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle an executor uses to stream progress back to the coordinator.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<f64>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<f64>) -> Self {
        Self { tx }
    }

    pub fn report(&self, progress: f64) {
        // The receiver only goes away once the job is over.
        let _ = self.tx.send(progress);
    }
}

/// Executes one job snapshot inside a worker.
///
/// `Ok` carries the result message, including per-job failures.
/// [`FleetError::WorkerAbort`] makes the worker process exit; any other
/// `Err` is turned into a per-job failure by the caller.
pub trait JobExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        job: ModelNode,
        progress: ProgressReporter,
    ) -> BoxFuture<'a, Result<ResultMessage>>;
}

/// Built-in executor for model nodes.
///
/// Recognized node properties:
/// - `command`: shell command to run; stdout lines `PROGRESS <fraction>` or
///   `PROGRESS <n>%` are progress, every other line lands in an `output`
///   data table. A non-zero exit fails the job.
/// - `steps` / `step_ms`: simulated work when there is no command.
/// - `fail`: fail the job with this message.
/// - `exit_code`: abort the worker process with this exit code.
pub struct ModelExecutor {
    progress_line: Regex,
}

impl ModelExecutor {
    pub fn new() -> Result<Self> {
        let progress_line = Regex::new(r"^PROGRESS\s+([0-9]*\.?[0-9]+)\s*(%)?\s*$")
            .map_err(|e| FleetError::Other(e.into()))?;
        Ok(Self { progress_line })
    }

    /// Parse a progress line into a fraction.
    pub fn parse_progress(&self, line: &str) -> Option<f64> {
        let caps = self.progress_line.captures(line.trim_end())?;
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        Some(if caps.get(2).is_some() { value / 100.0 } else { value })
    }

    async fn run(&self, job: ModelNode, progress: ProgressReporter) -> Result<ResultMessage> {
        let started = Instant::now();

        if let Some(code) = job.property("exit_code").and_then(JsonValue::as_i64) {
            let message = job
                .property("fail")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("job '{}' requested worker exit", job.name));
            return Err(FleetError::WorkerAbort {
                code: i32::try_from(code).unwrap_or(1),
                message,
            });
        }

        let steps = job.property("steps").and_then(JsonValue::as_u64).unwrap_or(1).max(1);
        let mut result = ResultMessage::default();

        let mut outcome_error = match job.property("command").and_then(JsonValue::as_str) {
            Some(cmd) => match self.run_command(&job.name, cmd, &progress).await {
                Ok(output) => {
                    if !output.is_empty() {
                        result.data_tables.push(output);
                    }
                    None
                }
                Err(e) => Some(e),
            },
            None => {
                let step_ms = job.property("step_ms").and_then(JsonValue::as_u64).unwrap_or(0);
                simulate_steps(steps, Duration::from_millis(step_ms), &progress).await;
                None
            }
        };

        if outcome_error.is_none() {
            outcome_error = job
                .property("fail")
                .and_then(JsonValue::as_str)
                .map(str::to_string);
        }

        let mut summary = Table::new("Summary")
            .with_column("job", ColumnType::Text)
            .with_column("nodes", ColumnType::Integer)
            .with_column("steps", ColumnType::Integer)
            .with_column("elapsed_ms", ColumnType::Integer)
            .with_column("outcome", ColumnType::Text);
        summary.push_row(vec![
            json!(job.name),
            json!(job.node_count()),
            json!(steps),
            json!(started.elapsed().as_millis() as u64),
            json!(if outcome_error.is_some() { "failed" } else { "ok" }),
        ]);
        result.report_tables.push(summary);
        result.error = outcome_error;

        info!(job = %job.name, success = result.is_success(), "job executed");
        Ok(result)
    }

    /// Run a shell command, streaming its stdout. Returns the collected
    /// non-progress output lines, or the per-job error message.
    async fn run_command(
        &self,
        job_name: &str,
        cmd: &str,
        progress: &ProgressReporter,
    ) -> std::result::Result<Table, String> {
        debug!(job = %job_name, cmd = %cmd, "running job command");

        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(cmd);
            c
        };

        // The worker's own stdin/stdout may be its channel; keep the child
        // off both. Its stderr flows into the worker's captured stderr.
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| format!("spawning command for job '{job_name}': {e}"))?;

        let mut output = Table::new("output").with_column("line", ColumnType::Text);
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match self.parse_progress(&line) {
                        Some(p) => progress.report(p),
                        None => output.push_row(vec![JsonValue::String(line)]),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(job = %job_name, error = %e, "failed reading command output");
                        break;
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| format!("waiting for command of job '{job_name}': {e}"))?;

        if status.success() {
            Ok(output)
        } else {
            let code = status.code().unwrap_or(-1);
            Err(format!("command exited with code {code}"))
        }
    }
}

async fn simulate_steps(steps: u64, step: Duration, progress: &ProgressReporter) {
    for i in 1..=steps {
        if !step.is_zero() {
            tokio::time::sleep(step).await;
        }
        progress.report(i as f64 / steps as f64);
    }
}

impl JobExecutor for ModelExecutor {
    fn execute<'a>(
        &'a self,
        job: ModelNode,
        progress: ProgressReporter,
    ) -> BoxFuture<'a, Result<ResultMessage>> {
        Box::pin(self.run(job, progress))
    }
}
