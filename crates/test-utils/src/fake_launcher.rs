use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::duplex;
use tokio::task::JoinHandle;

use jobfleet::errors::{FleetError, Result};
use jobfleet::exec::{Channel, LaunchedWorker, WorkerExit, WorkerHandle, WorkerLauncher};
use jobfleet::worker::{JobExecutor, ModelExecutor, serve};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const PIPE_CAPACITY: usize = 64 * 1024;

/// A fake launcher whose workers are tokio tasks on in-memory pipes.
///
/// - each "worker" runs the real `worker::serve` loop with the given
///   executor (the built-in `ModelExecutor` by default)
/// - a job with an `exit_code` property makes its worker "crash" with
///   that code, with the abort message as its captured stderr
/// - `fail_launch` makes specific slots fail to start
pub struct FakeLauncher {
    executor: Arc<dyn JobExecutor>,
    failing_slots: HashSet<usize>,
    launched: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        let executor = ModelExecutor::new().expect("built-in executor");
        Self::with_executor(Arc::new(executor))
    }

    pub fn with_executor(executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            executor,
            failing_slots: HashSet::new(),
            launched: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_launch(mut self, slot: usize) -> Self {
        self.failing_slots.insert(slot);
        self
    }

    /// Number of workers successfully launched so far.
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerLauncher for FakeLauncher {
    fn launch(&self, slot: usize) -> BoxFuture<'_, Result<LaunchedWorker>> {
        Box::pin(async move {
            if self.failing_slots.contains(&slot) {
                return Err(FleetError::Spawn {
                    slot,
                    reason: "injected launch failure".to_string(),
                });
            }

            let (coord_tx, worker_rx) = duplex(PIPE_CAPACITY);
            let (worker_tx, coord_rx) = duplex(PIPE_CAPACITY);
            let mut worker_chan = Channel::new(Box::new(worker_rx), Box::new(worker_tx));

            let stderr = Arc::new(Mutex::new(Vec::new()));
            let executor = Arc::clone(&self.executor);
            let task = {
                let stderr = Arc::clone(&stderr);
                tokio::spawn(async move {
                    match serve(&mut worker_chan, executor.as_ref()).await {
                        Ok(_) => 0,
                        Err(FleetError::WorkerAbort { code, message }) => {
                            stderr.lock().unwrap().push(message);
                            code
                        }
                        Err(e) => {
                            stderr.lock().unwrap().push(e.to_string());
                            2
                        }
                    }
                })
            };

            self.launched.fetch_add(1, Ordering::SeqCst);
            Ok(LaunchedWorker {
                slot,
                channel: Channel::new(Box::new(coord_rx), Box::new(coord_tx)),
                handle: Box::new(FakeHandle {
                    task: Some(task),
                    exit: None,
                    stderr,
                }),
            })
        })
    }
}

struct FakeHandle {
    task: Option<JoinHandle<i32>>,
    exit: Option<WorkerExit>,
    stderr: Arc<Mutex<Vec<String>>>,
}

impl WorkerHandle for FakeHandle {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn wait(&mut self) -> BoxFuture<'_, Result<WorkerExit>> {
        Box::pin(async move {
            if let Some(exit) = self.exit {
                return Ok(exit);
            }
            let exit = match self.task.as_mut() {
                Some(task) => match task.await {
                    Ok(code) => WorkerExit { code: Some(code) },
                    // Aborted by `kill`: looks like death by signal.
                    Err(e) if e.is_cancelled() => WorkerExit { code: None },
                    Err(_) => WorkerExit { code: Some(101) },
                },
                None => WorkerExit { code: None },
            };
            self.task = None;
            self.exit = Some(exit);
            Ok(exit)
        })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(task) = &self.task {
                task.abort();
            }
            Ok(())
        })
    }

    fn diagnostics(&mut self) -> BoxFuture<'_, String> {
        Box::pin(async move { self.stderr.lock().unwrap().join("\n") })
    }
}
