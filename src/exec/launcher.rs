// src/exec/launcher.rs

//! Starting worker processes and observing their exit.
//!
//! The run controller talks to a [`WorkerLauncher`] instead of spawning
//! processes itself. Production uses [`ProcessLauncher`]; tests can hand
//! in a launcher whose "workers" are tasks on in-memory pipes.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::Channel;
use crate::errors::{FleetError, Result};

/// Name of the hidden CLI subcommand a worker process runs.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Standard-stream placeholder for the worker's channel arguments.
pub const STDIO_PIPE: &str = "-";

/// Trailing stderr lines kept per worker for crash reports.
pub const STDERR_TAIL_LINES: usize = 64;

/// How long a worker gets to exit on its own once its channel is closed.
pub const EXIT_GRACE: Duration = Duration::from_secs(5);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "termination by signal"),
        }
    }
}

/// Owner-side handle on one running worker.
pub trait WorkerHandle: Send {
    /// OS process id, if there is one.
    fn pid(&self) -> Option<u32>;

    /// Wait for the worker to exit. Cancel-safe and callable repeatedly.
    fn wait(&mut self) -> BoxFuture<'_, Result<WorkerExit>>;

    /// Forcibly terminate the worker. No-op if it already exited.
    fn kill(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Captured diagnostic output, oldest line first.
    fn diagnostics(&mut self) -> BoxFuture<'_, String>;
}

/// A freshly started worker: its channel plus a handle for the observer.
pub struct LaunchedWorker {
    pub slot: usize,
    pub channel: Channel,
    pub handle: Box<dyn WorkerHandle>,
}

/// Anything that can start workers.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, slot: usize) -> BoxFuture<'_, Result<LaunchedWorker>>;

    /// Executable stray workers are matched against, if the launcher
    /// starts real processes.
    fn worker_exe(&self) -> Option<&Path> {
        None
    }
}

/// Launches `<exe> worker - -` with the stdio pipe pair as its channel.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    exe: PathBuf,
}

impl ProcessLauncher {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    /// Launcher for the currently running executable.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    async fn launch_inner(&self, slot: usize) -> Result<LaunchedWorker> {
        let mut cmd = Command::new(&self.exe);
        cmd.arg(WORKER_SUBCOMMAND)
            .arg(STDIO_PIPE)
            .arg(STDIO_PIPE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| FleetError::Spawn {
            slot,
            reason: format!("{}: {e}", self.exe.display()),
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(FleetError::Spawn {
                    slot,
                    reason: "worker stdio pipes unavailable".to_string(),
                });
            }
        };

        let pid = child.id();
        info!(slot, pid = ?pid, exe = %self.exe.display(), "worker started");

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&tail);
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(slot, "worker stderr: {}", line);
                    let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            })
        });

        Ok(LaunchedWorker {
            slot,
            channel: Channel::new(Box::new(stdout), Box::new(stdin)),
            handle: Box::new(ProcessHandle {
                slot,
                child,
                pid,
                tail,
                stderr_task,
            }),
        })
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, slot: usize) -> BoxFuture<'_, Result<LaunchedWorker>> {
        Box::pin(self.launch_inner(slot))
    }

    fn worker_exe(&self) -> Option<&Path> {
        Some(&self.exe)
    }
}

struct ProcessHandle {
    slot: usize,
    child: Child,
    pid: Option<u32>,
    tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl WorkerHandle for ProcessHandle {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<WorkerExit>> {
        Box::pin(async move {
            let status = self.child.wait().await?;
            Ok(WorkerExit {
                code: status.code(),
            })
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Err(e) = self.child.kill().await {
                // Already reaped processes report InvalidInput; nothing to do.
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    warn!(slot = self.slot, error = %e, "failed to kill worker");
                    return Err(e.into());
                }
            }
            Ok(())
        })
    }

    fn diagnostics(&mut self) -> BoxFuture<'_, String> {
        Box::pin(async move {
            // Stderr hits EOF once the process is gone; give the reader a
            // moment to drain what is still buffered.
            if let Some(task) = self.stderr_task.take() {
                let _ = tokio::time::timeout(Duration::from_millis(500), task).await;
            }
            let tail = self.tail.lock().unwrap_or_else(|e| e.into_inner());
            tail.iter().cloned().collect::<Vec<_>>().join("\n")
        })
    }
}
