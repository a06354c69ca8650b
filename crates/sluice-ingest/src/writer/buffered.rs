//! Bounded insert buffer shared by every sink family
//!
//! Rows accumulate into one pending batch per session. A batch holds rows
//! for a single table with a single column list; a row with a different
//! target starts a new batch after the current one is flushed.

use super::commands::{Row, SinkValue};
use crate::error::WriterError;

pub const DEFAULT_BATCH_SIZE: usize = 30;

/// Rows waiting to be sent as one statement
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SinkValue>>,
}

#[derive(Debug)]
pub struct InsertBuffer {
    batch_size: usize,
    max_params: usize,
    pending: Option<PendingBatch>,
}

impl InsertBuffer {
    pub fn new(batch_size: usize, max_params: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_params: max_params.max(1),
            pending: None,
        }
    }

    /// Rows per statement for `columns` columns, capped by the bind limit
    pub fn effective_batch_size(&self, columns: usize) -> usize {
        if columns == 0 {
            return self.batch_size;
        }
        self.batch_size.min(self.max_params / columns).max(1)
    }

    pub fn len(&self) -> usize {
        self.pending.as_ref().map(|b| b.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `row` can join the pending batch without a flush
    pub fn accepts(&self, table: &str, row: &Row) -> bool {
        match &self.pending {
            None => true,
            Some(batch) => {
                batch.table == table
                    && batch.columns.len() == row.len()
                    && batch.columns.iter().map(String::as_str).eq(row.column_names())
            }
        }
    }

    /// Add a row; callers flush first when [`accepts`](Self::accepts) is false
    pub fn push(&mut self, table: &str, row: Row) -> Result<(), WriterError> {
        if row.is_empty() {
            return Err(WriterError::RowMismatch {
                table: table.to_string(),
                message: "row has no columns".to_string(),
            });
        }
        if !self.accepts(table, &row) {
            return Err(WriterError::RowMismatch {
                table: table.to_string(),
                message: "row does not match the pending batch".to_string(),
            });
        }
        let batch = self.pending.get_or_insert_with(|| PendingBatch {
            table: table.to_string(),
            columns: row.column_names().map(str::to_string).collect(),
            rows: Vec::new(),
        });
        batch.rows.push(row.into_values());
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        match &self.pending {
            Some(batch) => batch.rows.len() >= self.effective_batch_size(batch.columns.len()),
            None => false,
        }
    }

    /// Remove the pending batch; it is gone whether or not sending succeeds
    pub fn take(&mut self) -> Option<PendingBatch> {
        self.pending.take().filter(|b| !b.rows.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn row(id: i64) -> Row {
        Row::new()
            .with("id", SinkValue::Int(id))
            .with("name", SinkValue::Text(format!("n{}", id)))
    }

    #[test]
    fn test_full_at_batch_size() {
        let mut buffer = InsertBuffer::new(2, 1000);
        buffer.push("t", row(1)).unwrap();
        assert!(!buffer.is_full());
        buffer.push("t", row(2)).unwrap();
        assert!(buffer.is_full());

        let batch = buffer.take().unwrap();
        assert_eq!(batch.columns, vec!["id", "name"]);
        assert_eq!(batch.rows.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.take().is_none());
    }

    #[test]
    fn test_bind_limit_caps_batch() {
        let buffer = InsertBuffer::new(30, 10);
        assert_eq!(buffer.effective_batch_size(2), 5);
        assert_eq!(buffer.effective_batch_size(20), 1);
        assert_eq!(buffer.effective_batch_size(0), 30);
    }

    #[test]
    fn test_shape_change_is_not_accepted() {
        let mut buffer = InsertBuffer::new(10, 1000);
        buffer.push("t", row(1)).unwrap();
        assert!(buffer.accepts("t", &row(2)));
        assert!(!buffer.accepts("other", &row(2)));
        let narrow = Row::new().with("id", SinkValue::Int(3));
        assert!(!buffer.accepts("t", &narrow));
        assert!(buffer.push("t", narrow).is_err());
    }

    #[test]
    fn test_empty_row_rejected() {
        let mut buffer = InsertBuffer::new(10, 1000);
        assert!(buffer.push("t", Row::new()).is_err());
    }
}
