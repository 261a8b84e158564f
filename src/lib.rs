// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod job;
pub mod logging;
pub mod sink;
pub mod types;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, RunArgs};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::config::{parse_duration, parse_timeout};
use crate::engine::{ProgressRegistry, RunCompletion, RunController, RunEvent, RunOptions};
use crate::exec::{ProcessLauncher, WorkerLauncher, worker_count};
use crate::job::{JobProvider, JobSource, StaticProvider};
use crate::sink::{JsonLinesSink, ResultSink};

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    match args.command {
        Command::Worker { inbound, outbound } => Ok(worker::run_worker_main(&inbound, &outbound).await),
        Command::Run(run_args) => run_jobs(run_args).await,
    }
}

/// `jobfleet run`: wires config, providers, sink, launcher and controller,
/// then prints a per-job summary.
///
/// Exits non-zero only on a run-level error; failed jobs are reported but
/// do not fail the run.
async fn run_jobs(args: RunArgs) -> Result<i32> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    let workers = worker_count(args.workers.or(cfg.pool.workers));
    let job_timeout = resolve_job_timeout(args.timeout.as_deref(), cfg.pool.job_timeout)?;
    let progress_every = args
        .progress_every
        .as_deref()
        .map(parse_duration)
        .transpose()
        .map_err(|e| anyhow::anyhow!("--progress-every: {e}"))?;

    let sink: Option<Arc<dyn ResultSink>> = match &args.output {
        Some(path) => Some(Arc::new(JsonLinesSink::create(path)?)),
        None => None,
    };
    let source = build_source(&cfg, sink)?;

    if args.dry_run {
        print_dry_run(&cfg, &source, workers, job_timeout);
        return Ok(0);
    }

    let launcher: Arc<dyn WorkerLauncher> = match &cfg.pool.worker_exe {
        Some(exe) => Arc::new(ProcessLauncher::new(exe)),
        None => Arc::new(ProcessLauncher::current_exe()?),
    };

    let options = RunOptions {
        workers,
        job_timeout,
        reap_strays: cfg.pool.reap_strays,
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let mut controller = RunController::new(source, launcher, options, tx);

    // Ctrl-C → kill workers, then report what finished.
    {
        let cancel = controller.cancel_token();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("interrupted; stopping workers");
            cancel.cancel();
        });
    }

    let progress_logger = progress_every.map(|every| spawn_progress_logger(controller.registry(), every));

    let printer = tokio::spawn(print_events(rx));
    let completion = controller.run().await;
    if let Some(logger) = progress_logger {
        logger.abort();
    }
    // The controller still holds its sender; the printer stops at the
    // run-completion event.
    let _ = printer.await;

    Ok(if completion.is_success() { 0 } else { 1 })
}

/// `--timeout` wins over `[pool].job_timeout`; both must be non-zero.
fn resolve_job_timeout(flag: Option<&str>, configured: Option<Duration>) -> Result<Option<Duration>> {
    match flag {
        Some(s) => Ok(Some(parse_timeout(s).map_err(|e| anyhow::anyhow!("--timeout: {e}"))?)),
        None => Ok(configured),
    }
}

/// One provider per `[[provider]]` section, in file order.
pub fn build_source(cfg: &ConfigFile, sink: Option<Arc<dyn ResultSink>>) -> crate::errors::Result<JobSource> {
    let mut source = JobSource::new();
    for provider_cfg in &cfg.providers {
        let provider = StaticProvider::from_config(provider_cfg, &cfg.base_dir, sink.clone())?;
        debug!(provider = %provider.name(), jobs = provider.len(), "provider ready");
        source = source.with_provider(Arc::new(provider));
    }
    Ok(source)
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<RunEvent>) {
    let mut failed = 0usize;
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::JobCompleted(job) => match &job.error {
                None => println!("[ok]     {}/{} ({:.2?})", job.provider, job.name, job.elapsed),
                Some(err) => {
                    failed += 1;
                    println!("[failed] {}/{} ({:.2?}): {err}", job.provider, job.name, job.elapsed);
                }
            },
            RunEvent::RunCompleted(run) => {
                print_summary(&run, failed);
                break;
            }
        }
    }
}

fn print_summary(run: &RunCompletion, failed: usize) {
    println!();
    println!(
        "{} jobs completed ({} failed) in {:.2?}",
        run.jobs_completed, failed, run.elapsed
    );
    if let Some(ref err) = run.error {
        println!("run error: {err}");
    }
}

fn spawn_progress_logger(registry: Arc<ProgressRegistry>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for entry in registry.snapshot() {
                info!(
                    job = %entry.id,
                    name = %entry.name,
                    provider = %entry.provider,
                    progress = %format!("{:.0}%", entry.progress * 100.0),
                    "running"
                );
            }
        }
    })
}

/// Simple dry-run output: print pool settings and every job.
fn print_dry_run(cfg: &ConfigFile, source: &JobSource, workers: usize, job_timeout: Option<Duration>) {
    println!("jobfleet dry-run");
    println!("  pool.workers = {workers}");
    if let Some(t) = job_timeout {
        println!("  pool.job_timeout = {t:?}");
    }
    println!("  pool.reap_strays = {}", cfg.pool.reap_strays);
    if let Some(ref exe) = cfg.pool.worker_exe {
        println!("  pool.worker_exe = {}", exe.display());
    }
    println!();

    println!("providers ({}):", cfg.providers.len());
    for provider in cfg.providers.iter() {
        println!("  - {}", provider.name);
        if let Some(ref tree) = provider.tree {
            println!("      tree: {}", tree.display());
        }
    }
    println!();

    let jobs: Vec<_> = source.jobs().collect();
    println!("jobs ({}):", jobs.len());
    for job in jobs {
        let marker = if job.is_noop() { " (noop)" } else { "" };
        println!("  {} {}/{}{marker}", job.id, job.provider, job.name);
    }

    debug!("dry-run complete (no execution)");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_flag_overrides_config() {
        let configured = Some(Duration::from_secs(60));
        assert_eq!(
            resolve_job_timeout(Some("5s"), configured).unwrap(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(resolve_job_timeout(None, configured).unwrap(), configured);
        assert_eq!(resolve_job_timeout(None, None).unwrap(), None);
    }

    #[test]
    fn zero_timeout_flag_is_rejected() {
        let err = resolve_job_timeout(Some("0s"), None).unwrap_err();
        assert!(err.to_string().contains("--timeout"), "{err}");
        assert!(resolve_job_timeout(Some("later"), None).is_err());
    }
}
