//! Per-branch record writer

use serde_json::Value;
use tracing::debug;

use super::commands::WriterCommands;
use super::row::RowConverter;
use crate::error::{StateError, WriterError};
use crate::state::{keys, Branch, State};

/// Table a branch writes into: its staging table when one was prepared,
/// otherwise the final table
pub fn target_table(state: &State, branch: Branch) -> Result<String, StateError> {
    let staging = branch.key(keys::WRITER_STAGING_TABLE);
    if let Some(table) = state.get(&staging) {
        return Ok(table.to_string());
    }
    state
        .require(&branch.key(keys::PUBLISHER_FINAL_TABLE))
        .map(str::to_string)
}

pub struct StagingWriter {
    commands: Box<dyn WriterCommands>,
    table: String,
    converter: RowConverter,
    written: u64,
}

impl StagingWriter {
    pub fn new(commands: Box<dyn WriterCommands>, table: impl Into<String>, converter: RowConverter) -> Self {
        Self {
            commands,
            table: table.into(),
            converter,
            written: 0,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn write(&mut self, record: &Value) -> Result<(), WriterError> {
        let row = self.converter.convert(&self.table, record)?;
        self.commands.insert(&self.table, row).await?;
        self.written += 1;
        Ok(())
    }

    /// Flush what is buffered and release the session
    pub async fn close(mut self) -> Result<u64, WriterError> {
        self.commands.close().await?;
        debug!(table = %self.table, records = self.written, "Closed writer");
        Ok(self.written)
    }
}
