//! Opening writer command sessions per branch

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::commands::WriterCommands;
use super::dialect::Dialect;
use super::memory::MemoryDatabase;
use super::session::{MySqlSession, PgSession};
use super::sql::SqlWriterCommands;
use crate::config::SinkConfig;
use crate::error::WriterError;
use crate::state::{keys, Branch, State};

/// Sink families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    MySql,
    Postgres,
    Memory,
}

impl SinkKind {
    pub fn as_str(&self) -> &str {
        match self {
            SinkKind::MySql => "mysql",
            SinkKind::Postgres => "postgres",
            SinkKind::Memory => "memory",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = WriterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(SinkKind::MySql),
            "postgres" | "postgresql" => Ok(SinkKind::Postgres),
            "memory" => Ok(SinkKind::Memory),
            other => Err(WriterError::Config(format!("unknown sink type '{}'", other))),
        }
    }
}

/// Opens one command session for a branch
#[async_trait]
pub trait CommandsFactory: Send + Sync {
    async fn open(&self, state: &State, branch: Branch) -> Result<Box<dyn WriterCommands>, WriterError>;
}

fn batch_size(state: &State, branch: Branch, default: usize) -> Result<usize, WriterError> {
    state
        .get_usize_or(&branch.key(keys::WRITER_BATCH_SIZE), default)
        .map_err(|e| WriterError::Config(e.to_string()))
}

/// MySQL and PostgreSQL sessions from the process sink configuration
pub struct SqlCommandsFactory {
    config: SinkConfig,
}

impl SqlCommandsFactory {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CommandsFactory for SqlCommandsFactory {
    async fn open(&self, state: &State, branch: Branch) -> Result<Box<dyn WriterCommands>, WriterError> {
        let url = self
            .config
            .url
            .as_deref()
            .ok_or_else(|| WriterError::Config("sink.url is not set".to_string()))?;
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let batch = batch_size(state, branch, self.config.batch_size)?;
        let qualifier = self.config.qualifier.clone();
        debug!(sink = %self.config.kind, branch = branch.id, batch_size = batch, "Opening sink session");

        match self.config.kind {
            SinkKind::MySql => {
                let session = MySqlSession::connect(url, timeout).await?;
                Ok(Box::new(
                    SqlWriterCommands::new(session, Dialect::MySql, batch).with_qualifier(qualifier),
                ))
            }
            SinkKind::Postgres => {
                let session = PgSession::connect(url, timeout).await?;
                Ok(Box::new(
                    SqlWriterCommands::new(session, Dialect::Postgres, batch).with_qualifier(qualifier),
                ))
            }
            SinkKind::Memory => Err(WriterError::Config(
                "memory sinks are opened through MemoryCommandsFactory".to_string(),
            )),
        }
    }
}

/// Sessions over a shared [`MemoryDatabase`]
#[derive(Clone)]
pub struct MemoryCommandsFactory {
    db: MemoryDatabase,
    batch_size: usize,
}

impl MemoryCommandsFactory {
    pub fn new(db: MemoryDatabase, batch_size: usize) -> Self {
        Self { db, batch_size }
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }
}

#[async_trait]
impl CommandsFactory for MemoryCommandsFactory {
    async fn open(&self, state: &State, branch: Branch) -> Result<Box<dyn WriterCommands>, WriterError> {
        let batch = batch_size(state, branch, self.batch_size)?;
        Ok(Box::new(self.db.commands(batch)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_kind_parsing() {
        assert_eq!("MySQL".parse::<SinkKind>().unwrap(), SinkKind::MySql);
        assert_eq!("postgresql".parse::<SinkKind>().unwrap(), SinkKind::Postgres);
        assert!("oracle".parse::<SinkKind>().is_err());
    }

    #[tokio::test]
    async fn test_sql_factory_requires_url() {
        let factory = SqlCommandsFactory::new(SinkConfig::default());
        let result = factory.open(&State::new(), Branch::SINGLE).await;
        assert!(matches!(result, Err(WriterError::Config(_))));
    }

    #[tokio::test]
    async fn test_memory_factory_honours_branch_batch_size() {
        let db = MemoryDatabase::new();
        db.create_table("t", &[("id", "bigint")]).await.unwrap();
        let factory = MemoryCommandsFactory::new(db.clone(), 30);
        let state = State::new().with_prop("writer.batch.size.1", 1);

        let mut commands = factory.open(&state, Branch::new(2, 1)).await.unwrap();
        commands
            .insert("t", crate::writer::Row::new().with("id", crate::writer::SinkValue::Int(1)))
            .await
            .unwrap();
        assert_eq!(db.table("t").await.unwrap().rows.len(), 1);
    }
}
