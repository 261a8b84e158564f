// src/types.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Opaque handle identifying a job for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        JobId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Column type of a [`Table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// A named, typed tabular payload produced by a worker and handed to a
/// result sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Vec<JsonValue>>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(Column {
            name: name.into(),
            ty,
        });
        self
    }

    /// Append a row. Rows shorter than the column list are padded with
    /// `null`; longer rows are truncated.
    pub fn push_row(&mut self, mut row: Vec<JsonValue>) {
        row.resize(self.columns.len(), JsonValue::Null);
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn push_row_pads_and_truncates_to_column_count() {
        let mut table = Table::new("Summary")
            .with_column("job", ColumnType::Text)
            .with_column("steps", ColumnType::Integer);

        table.push_row(vec![json!("a")]);
        table.push_row(vec![json!("b"), json!(2), json!("extra")]);

        assert_eq!(table.rows[0], vec![json!("a"), JsonValue::Null]);
        assert_eq!(table.rows[1], vec![json!("b"), json!(2)]);
    }

    #[test]
    fn column_type_serializes_lowercase() {
        let col = Column {
            name: "x".into(),
            ty: ColumnType::Real,
        };
        let json = serde_json::to_string(&col).unwrap();
        assert_eq!(json, r#"{"name":"x","type":"real"}"#);
    }
}
