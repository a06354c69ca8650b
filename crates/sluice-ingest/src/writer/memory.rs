//! In-process sink for dry runs and tests
//!
//! Tables live behind one shared lock; each [`MemoryWriterCommands`] keeps
//! its own insert buffer exactly like a SQL session would.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::buffered::{InsertBuffer, PendingBatch};
use super::commands::{validate_table_name, DateType, Row, WriterCommands};
use super::dialect::{Dialect, MAX_BIND_PARAMS};
use crate::error::WriterError;

/// Statement log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateFromReference { reference: String, table: String },
    Insert { table: String, rows: usize },
    Count { table: String },
    Truncate { table: String },
    DeleteAll { table: String },
    Drop { table: String },
    Copy { from: String, to: String },
    Introspect { table: String },
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    /// Column name and native type
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, MemoryTable>,
    statements: Vec<Statement>,
}

impl Inner {
    fn table_mut(&mut self, table: &str) -> Result<&mut MemoryTable, WriterError> {
        self.tables
            .get_mut(table)
            .ok_or_else(|| WriterError::TableNotFound(table.to_string()))
    }
}

/// Shared handle to the in-memory database
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table with `(column, native type)` pairs using MySQL type names
    pub async fn create_table(&self, table: &str, columns: &[(&str, &str)]) -> Result<(), WriterError> {
        validate_table_name(table)?;
        let mut inner = self.inner.lock().await;
        if inner.tables.contains_key(table) {
            return Err(WriterError::TableExists(table.to_string()));
        }
        inner.tables.insert(
            table.to_string(),
            MemoryTable {
                columns: columns
                    .iter()
                    .map(|(c, t)| (c.to_string(), t.to_string()))
                    .collect(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    pub async fn table(&self, table: &str) -> Option<MemoryTable> {
        self.inner.lock().await.tables.get(table).cloned()
    }

    pub async fn table_names(&self) -> Vec<String> {
        self.inner.lock().await.tables.keys().cloned().collect()
    }

    pub async fn statements(&self) -> Vec<Statement> {
        self.inner.lock().await.statements.clone()
    }

    pub fn commands(&self, batch_size: usize) -> MemoryWriterCommands {
        MemoryWriterCommands {
            db: self.clone(),
            buffer: InsertBuffer::new(batch_size, MAX_BIND_PARAMS),
            closed: false,
        }
    }
}

pub struct MemoryWriterCommands {
    db: MemoryDatabase,
    buffer: InsertBuffer,
    closed: bool,
}

impl MemoryWriterCommands {
    fn check_open(&self) -> Result<(), WriterError> {
        if self.closed {
            Err(WriterError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn apply_batch(&self, batch: PendingBatch) -> Result<(), WriterError> {
        let mut inner = self.db.inner.lock().await;
        let target = inner.table_mut(&batch.table)?;
        if let Some(unknown) = batch
            .columns
            .iter()
            .find(|c| !target.columns.iter().any(|(name, _)| name == *c))
        {
            return Err(WriterError::RowMismatch {
                table: batch.table.clone(),
                message: format!("unknown column '{}'", unknown),
            });
        }

        let count = batch.rows.len();
        for values in batch.rows {
            let mut row = Row::new();
            for (column, value) in batch.columns.iter().zip(values) {
                row.push(column.clone(), value);
            }
            target.rows.push(row);
        }
        inner.statements.push(Statement::Insert {
            table: batch.table,
            rows: count,
        });
        Ok(())
    }
}

#[async_trait]
impl WriterCommands for MemoryWriterCommands {
    async fn create_from_reference(&mut self, reference: &str, table: &str) -> Result<(), WriterError> {
        self.check_open()?;
        validate_table_name(table)?;
        let mut inner = self.db.inner.lock().await;
        let columns = inner.table_mut(reference)?.columns.clone();
        if inner.tables.contains_key(table) {
            return Err(WriterError::TableExists(table.to_string()));
        }
        inner.tables.insert(
            table.to_string(),
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
        inner.statements.push(Statement::CreateFromReference {
            reference: reference.to_string(),
            table: table.to_string(),
        });
        Ok(())
    }

    async fn insert(&mut self, table: &str, row: Row) -> Result<(), WriterError> {
        self.check_open()?;
        validate_table_name(table)?;
        if !self.db.inner.lock().await.tables.contains_key(table) {
            return Err(WriterError::TableNotFound(table.to_string()));
        }
        if !self.buffer.accepts(table, &row) {
            self.flush().await?;
        }
        self.buffer.push(table, row)?;
        if self.buffer.is_full() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), WriterError> {
        match self.buffer.take() {
            Some(batch) => {
                debug!(table = %batch.table, rows = batch.rows.len(), "Flushing insert batch");
                self.apply_batch(batch).await
            }
            None => Ok(()),
        }
    }

    async fn is_empty(&mut self, table: &str) -> Result<bool, WriterError> {
        self.check_open()?;
        let mut inner = self.db.inner.lock().await;
        let empty = inner.table_mut(table)?.rows.is_empty();
        inner.statements.push(Statement::Count {
            table: table.to_string(),
        });
        Ok(empty)
    }

    async fn truncate(&mut self, table: &str) -> Result<(), WriterError> {
        self.check_open()?;
        let mut inner = self.db.inner.lock().await;
        inner.table_mut(table)?.rows.clear();
        inner.statements.push(Statement::Truncate {
            table: table.to_string(),
        });
        Ok(())
    }

    async fn delete_all(&mut self, table: &str) -> Result<(), WriterError> {
        self.check_open()?;
        let mut inner = self.db.inner.lock().await;
        inner.table_mut(table)?.rows.clear();
        inner.statements.push(Statement::DeleteAll {
            table: table.to_string(),
        });
        Ok(())
    }

    async fn drop_table(&mut self, table: &str) -> Result<(), WriterError> {
        self.check_open()?;
        let mut inner = self.db.inner.lock().await;
        if inner.tables.remove(table).is_none() {
            return Err(WriterError::TableNotFound(table.to_string()));
        }
        inner.statements.push(Statement::Drop {
            table: table.to_string(),
        });
        Ok(())
    }

    async fn copy_table(&mut self, from: &str, to: &str) -> Result<(), WriterError> {
        self.check_open()?;
        let mut inner = self.db.inner.lock().await;
        let rows = inner.table_mut(from)?.rows.clone();
        inner.table_mut(to)?.rows.extend(rows);
        inner.statements.push(Statement::Copy {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    async fn introspect_date_columns(
        &mut self,
        table: &str,
    ) -> Result<BTreeMap<String, DateType>, WriterError> {
        self.check_open()?;
        let mut inner = self.db.inner.lock().await;
        let columns = inner
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| WriterError::NoColumnMetadata(table.to_string()))?;
        inner.statements.push(Statement::Introspect {
            table: table.to_string(),
        });
        Ok(columns
            .into_iter()
            .filter_map(|(name, native)| Dialect::MySql.date_type(&native).map(|t| (name, t)))
            .collect())
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush().await;
        self.closed = true;
        flushed
    }
}
