//! Date column discovery for the row converter

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::Initializer;
use crate::error::InitializerError;
use crate::state::{keys, Branch, State, WorkUnit};
use crate::writer::CommandsFactory;

/// Introspects the branch's final table once and hands the date column
/// mapping to every work unit under `converter.row.date_fields[.<branch>]`
pub struct DateColumnsInitializer {
    name: String,
    state: State,
    branch: Branch,
    factory: Arc<dyn CommandsFactory>,
}

impl DateColumnsInitializer {
    pub fn new(state: State, branch: Branch, factory: Arc<dyn CommandsFactory>) -> Self {
        Self {
            name: format!("date_columns[{}]", branch.id),
            state,
            branch,
            factory,
        }
    }

    fn writer_error(&self, source: crate::error::WriterError) -> InitializerError {
        InitializerError::Writer {
            name: self.name.clone(),
            source,
        }
    }
}

#[async_trait]
impl Initializer for DateColumnsInitializer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self, work_units: &mut [WorkUnit]) -> Result<(), InitializerError> {
        let table = self
            .state
            .require(&self.branch.key(keys::PUBLISHER_FINAL_TABLE))?
            .to_string();

        let mut commands = self
            .factory
            .open(&self.state, self.branch)
            .await
            .map_err(|e| self.writer_error(e))?;
        let introspected = commands.introspect_date_columns(&table).await;
        let closed = commands.close().await;
        let dates = introspected.map_err(|e| self.writer_error(e))?;
        closed.map_err(|e| self.writer_error(e))?;

        let encoded = serde_json::to_string(&dates)?;
        let key = self.branch.key(keys::CONVERTER_ROW_DATE_FIELDS);
        for unit in work_units.iter_mut() {
            unit.state.set_prop(key.clone(), &encoded);
        }

        info!(
            table = %table,
            branch = self.branch.id,
            date_columns = dates.len(),
            work_units = work_units.len(),
            "Broadcast date column mapping"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), InitializerError> {
        Ok(())
    }
}
