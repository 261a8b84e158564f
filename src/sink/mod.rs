// src/sink/mod.rs

//! Result sinks: where report and data tables end up once a job is done.
//!
//! Dispatchers call a job's sink concurrently, so every implementation
//! must be `Send + Sync` and tolerate interleaved writes from different
//! jobs.

pub mod jsonl;

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::errors::Result;
use crate::types::Table;

pub use jsonl::JsonLinesSink;

pub trait ResultSink: Send + Sync {
    fn write_report_table(&self, job: &str, table: &Table) -> Result<()>;

    fn write_data_table(&self, job: &str, table: &Table) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Report,
    Data,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredTable {
    pub job: String,
    pub kind: TableKind,
    pub table: Table,
}

/// Collects every table in memory, in write order.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<Vec<StoredTable>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StoredTable>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, job: &str, kind: TableKind, table: &Table) {
        self.lock().push(StoredTable {
            job: job.to_string(),
            kind,
            table: table.clone(),
        });
    }

    pub fn tables(&self) -> Vec<StoredTable> {
        self.lock().clone()
    }

    pub fn tables_for(&self, job: &str) -> Vec<StoredTable> {
        self.lock().iter().filter(|t| t.job == job).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl ResultSink for MemorySink {
    fn write_report_table(&self, job: &str, table: &Table) -> Result<()> {
        self.push(job, TableKind::Report, table);
        Ok(())
    }

    fn write_data_table(&self, job: &str, table: &Table) -> Result<()> {
        self.push(job, TableKind::Data, table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    #[test]
    fn memory_sink_keeps_write_order_and_kind() {
        let sink = MemorySink::new();
        let table = Table::new("Summary").with_column("job", ColumnType::Text);
        sink.write_report_table("a", &table).unwrap();
        sink.write_data_table("b", &table).unwrap();
        sink.write_data_table("a", &table).unwrap();

        let kinds: Vec<_> = sink.tables_for("a").into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TableKind::Report, TableKind::Data]);
        assert_eq!(sink.len(), 3);
    }
}
