// src/exec/mod.rs

//! Coordinator-to-worker plumbing.
//!
//! - [`protocol`]: the wire envelope.
//! - [`channel`]: length-prefixed framing and the per-job exchange.
//! - [`launcher`]: spawning worker processes behind a trait.
//! - [`supervisor`]: pool sizing, start and stop.
//! - [`reaper`]: killing orphaned workers from earlier runs.

pub mod channel;
pub mod launcher;
pub mod protocol;
pub mod reaper;
pub mod supervisor;

pub use channel::{BoxReader, BoxWriter, Channel};
pub use launcher::{
    EXIT_GRACE, LaunchedWorker, ProcessLauncher, WORKER_SUBCOMMAND, WorkerExit, WorkerHandle,
    WorkerLauncher,
};
pub use protocol::{Envelope, ResultMessage};
pub use supervisor::{WorkerSupervisor, resolve_worker_count, worker_count};
