// src/exec/protocol.rs

//! Wire messages exchanged between the coordinator and a worker.
//!
//! Every message is one [`Envelope`], serialized as JSON with an explicit
//! `kind` discriminator and framed with a 4-byte big-endian length prefix
//! (see [`super::channel`]).

use serde::{Deserialize, Serialize};

use crate::job::ModelNode;
use crate::types::Table;

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// Coordinator to worker: a standalone job snapshot.
    Job { job: ModelNode },

    /// Worker to coordinator: zero or more per job, before its result.
    ProgressReport { progress: f64 },

    /// Worker to coordinator: exactly one per job.
    Result(ResultMessage),
}

impl Envelope {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Envelope::Job { .. } => "job",
            Envelope::ProgressReport { .. } => "progress_report",
            Envelope::Result(_) => "result",
        }
    }
}

/// The outcome of one job as reported by the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Per-job failure. Never fatal to the run.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub report_tables: Vec<Table>,
    #[serde(default)]
    pub data_tables: Vec<Table>,
}

impl ResultMessage {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
