// src/sink/jsonl.rs

//! Append-only JSON Lines dump of result tables.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use super::{ResultSink, TableKind};
use crate::errors::{FleetError, Result};
use crate::types::Table;

#[derive(Serialize)]
struct Line<'a> {
    job: &'a str,
    kind: TableKind,
    table: &'a Table,
}

/// Writes one JSON object per table to a file, one per line.
pub struct JsonLinesSink {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened result sink");
        Ok(Self {
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_line(&self, job: &str, kind: TableKind, table: &Table) -> Result<()> {
        let mut line = serde_json::to_vec(&Line { job, kind, table })?;
        line.push(b'\n');

        let mut out = self
            .out
            .lock()
            .map_err(|_| FleetError::Sink(format!("{} writer poisoned", self.path.display())))?;
        out.write_all(&line)
            .and_then(|_| out.flush())
            .map_err(|e| FleetError::Sink(format!("writing {}: {e}", self.path.display())))
    }
}

impl ResultSink for JsonLinesSink {
    fn write_report_table(&self, job: &str, table: &Table) -> Result<()> {
        self.write_line(job, TableKind::Report, table)
    }

    fn write_data_table(&self, job: &str, table: &Table) -> Result<()> {
        self.write_line(job, TableKind::Data, table)
    }
}
