//! Staged writer command set
//!
//! Every command is a single statement over one session. Nothing here opens
//! a transaction across commands; ordering a create/insert/copy/drop publish
//! is the caller's job.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::WriterError;

/// Value of one column in a sink row
#[derive(Debug, Clone, PartialEq)]
pub enum SinkValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl SinkValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SinkValue::Null)
    }
}

/// Ordered column/value pairs for one insert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SinkValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: SinkValue) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: SinkValue) {
        self.columns.push((column.into(), value));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(c, _)| c.as_str())
    }

    pub fn get(&self, column: &str) -> Option<&SinkValue> {
        self.columns.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn into_values(self) -> Vec<SinkValue> {
        self.columns.into_iter().map(|(_, v)| v).collect()
    }
}

/// Temporal column kinds reported by introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DateType {
    Date,
    Time,
    Timestamp,
}

impl fmt::Display for DateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateType::Date => write!(f, "DATE"),
            DateType::Time => write!(f, "TIME"),
            DateType::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

#[async_trait]
pub trait WriterCommands: Send {
    /// Create `table` with the structure of `reference` and no rows
    async fn create_from_reference(&mut self, reference: &str, table: &str) -> Result<(), WriterError>;

    /// Buffer a row; a full batch is sent as one multi-row statement
    async fn insert(&mut self, table: &str, row: Row) -> Result<(), WriterError>;

    /// Send any buffered rows now
    async fn flush(&mut self) -> Result<(), WriterError>;

    /// `SELECT COUNT(*)`; a missing result row is an error, not "empty"
    async fn is_empty(&mut self, table: &str) -> Result<bool, WriterError>;

    async fn truncate(&mut self, table: &str) -> Result<(), WriterError>;

    async fn delete_all(&mut self, table: &str) -> Result<(), WriterError>;

    async fn drop_table(&mut self, table: &str) -> Result<(), WriterError>;

    /// Append every row of `from` to `to` in one statement
    async fn copy_table(&mut self, from: &str, to: &str) -> Result<(), WriterError>;

    /// Columns whose native type maps to DATE, TIME or TIMESTAMP
    async fn introspect_date_columns(&mut self, table: &str)
        -> Result<BTreeMap<String, DateType>, WriterError>;

    /// Flush buffered rows, then release the session
    async fn close(&mut self) -> Result<(), WriterError>;
}

/// Table names are plain identifiers, optionally `database.table`
pub fn validate_table_name(table: &str) -> Result<(), WriterError> {
    let segments: Vec<&str> = table.split('.').collect();
    let valid = !table.is_empty()
        && segments.len() <= 2
        && segments.iter().all(|s| {
            !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        });
    if valid {
        Ok(())
    } else {
        Err(WriterError::InvalidIdentifier(table.to_string()))
    }
}
