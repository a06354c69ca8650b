//! Staging table preparation

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::Initializer;
use crate::error::{InitializerError, WriterError};
use crate::state::{keys, Branch, State, WorkUnit};
use crate::writer::CommandsFactory;

/// Prepares one staging table per branch before tasks start
///
/// A user-named staging table (`writer.staging.table`) is emptied if it
/// holds rows. Otherwise a `stage_<id>` table is created from the final
/// table's definition and dropped again on close.
pub struct StagingTableInitializer {
    name: String,
    state: State,
    branch: Branch,
    factory: Arc<dyn CommandsFactory>,
    created: Option<String>,
}

impl StagingTableInitializer {
    pub fn new(state: State, branch: Branch, factory: Arc<dyn CommandsFactory>) -> Self {
        Self {
            name: format!("staging_table[{}]", branch.id),
            state,
            branch,
            factory,
            created: None,
        }
    }

    /// Table created by this initializer, if any
    pub fn created_table(&self) -> Option<&str> {
        self.created.as_deref()
    }

    fn writer_error(&self, source: WriterError) -> InitializerError {
        InitializerError::Writer {
            name: self.name.clone(),
            source,
        }
    }

    async fn prepare(&mut self, final_table: &str) -> Result<String, WriterError> {
        let mut commands = self.factory.open(&self.state, self.branch).await?;
        let prepared = match self.state.get(&self.branch.key(keys::WRITER_STAGING_TABLE)) {
            Some(user_table) => {
                let table = user_table.to_string();
                match commands.is_empty(&table).await {
                    Ok(true) => Ok(table),
                    Ok(false) => {
                        warn!(table = %table, "Staging table is not empty, truncating");
                        commands.truncate(&table).await.map(|_| table)
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                let table = staging_name(final_table);
                let created = commands.create_from_reference(final_table, &table).await;
                if created.is_ok() {
                    self.created = Some(table.clone());
                }
                created.map(|_| table)
            }
        };
        let closed = commands.close().await;
        let table = prepared?;
        closed?;
        Ok(table)
    }
}

/// `stage_<uuid>` placed in the same database as `final_table`
fn staging_name(final_table: &str) -> String {
    let bare = format!("stage_{}", Uuid::new_v4().simple());
    match final_table.rsplit_once('.') {
        Some((database, _)) => format!("{}.{}", database, bare),
        None => bare,
    }
}

#[async_trait]
impl Initializer for StagingTableInitializer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self, work_units: &mut [WorkUnit]) -> Result<(), InitializerError> {
        let final_table = self
            .state
            .require(&self.branch.key(keys::PUBLISHER_FINAL_TABLE))?
            .to_string();
        let staging = self
            .prepare(&final_table)
            .await
            .map_err(|e| self.writer_error(e))?;

        let key = self.branch.key(keys::WRITER_STAGING_TABLE);
        self.state.set_prop(key.clone(), &staging);
        for unit in work_units.iter_mut() {
            unit.state.set_prop(key.clone(), &staging);
        }
        info!(staging = %staging, final_table = %final_table, branch = self.branch.id, "Prepared staging table");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), InitializerError> {
        let Some(table) = self.created.take() else {
            return Ok(());
        };
        let mut commands = self
            .factory
            .open(&self.state, self.branch)
            .await
            .map_err(|e| self.writer_error(e))?;
        let dropped = commands.drop_table(&table).await;
        let closed = commands.close().await;
        dropped.map_err(|e| self.writer_error(e))?;
        closed.map_err(|e| self.writer_error(e))?;
        info!(staging = %table, "Dropped staging table");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::writer::memory::MemoryDatabase;
    use crate::writer::{MemoryCommandsFactory, Row, SinkValue, WriterCommands};

    async fn orders_db() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.create_table("orders", &[("id", "bigint")]).await.unwrap();
        db
    }

    #[test]
    fn test_staging_name_follows_final_database() {
        assert!(staging_name("orders").starts_with("stage_"));
        assert!(staging_name("sales.orders").starts_with("sales.stage_"));
    }

    #[tokio::test]
    async fn test_creates_then_drops_generated_table() {
        let db = orders_db().await;
        let factory = Arc::new(MemoryCommandsFactory::new(db.clone(), 30));
        let state = State::new().with_prop(keys::PUBLISHER_FINAL_TABLE, "orders");
        let mut initializer = StagingTableInitializer::new(state, Branch::SINGLE, factory);
        let mut units = vec![WorkUnit::with_id("u_0", State::new())];

        initializer.initialize(&mut units).await.unwrap();
        let staging = units[0].state.get(keys::WRITER_STAGING_TABLE).unwrap().to_string();
        assert_eq!(initializer.created_table(), Some(staging.as_str()));
        assert!(db.table(&staging).await.is_some());

        initializer.close().await.unwrap();
        assert!(db.table(&staging).await.is_none());
        assert_eq!(db.table_names().await, vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_user_table_is_truncated_and_kept() {
        let db = orders_db().await;
        db.create_table("my_stage", &[("id", "bigint")]).await.unwrap();
        let mut commands = db.commands(30);
        commands.insert("my_stage", Row::new().with("id", SinkValue::Int(1))).await.unwrap();
        commands.close().await.unwrap();

        let factory = Arc::new(MemoryCommandsFactory::new(db.clone(), 30));
        let state = State::new()
            .with_prop(keys::PUBLISHER_FINAL_TABLE, "orders")
            .with_prop(keys::WRITER_STAGING_TABLE, "my_stage");
        let mut initializer = StagingTableInitializer::new(state, Branch::SINGLE, factory);
        let mut units = vec![WorkUnit::with_id("u_0", State::new())];

        initializer.initialize(&mut units).await.unwrap();
        assert!(db.table("my_stage").await.unwrap().rows.is_empty());
        assert_eq!(units[0].state.get(keys::WRITER_STAGING_TABLE), Some("my_stage"));

        initializer.close().await.unwrap();
        assert!(db.table("my_stage").await.is_some());
    }
}
