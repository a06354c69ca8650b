//! Writer commands for SQL sinks (MySQL, PostgreSQL)

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::buffered::InsertBuffer;
use super::commands::{validate_table_name, DateType, Row, WriterCommands};
use super::dialect::{Dialect, MAX_BIND_PARAMS};
use super::session::SqlSession;
use crate::error::WriterError;

pub struct SqlWriterCommands<S: SqlSession> {
    session: S,
    dialect: Dialect,
    /// Database prepended to bare table names
    qualifier: Option<String>,
    buffer: InsertBuffer,
}

impl<S: SqlSession> SqlWriterCommands<S> {
    pub fn new(session: S, dialect: Dialect, batch_size: usize) -> Self {
        Self::with_max_params(session, dialect, batch_size, MAX_BIND_PARAMS)
    }

    pub fn with_max_params(session: S, dialect: Dialect, batch_size: usize, max_params: usize) -> Self {
        Self {
            session,
            dialect,
            qualifier: None,
            buffer: InsertBuffer::new(batch_size, max_params),
        }
    }

    pub fn with_qualifier(mut self, qualifier: Option<String>) -> Self {
        self.qualifier = qualifier.filter(|q| !q.trim().is_empty());
        self
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    fn table(&self, table: &str) -> Result<String, WriterError> {
        validate_table_name(table)?;
        Ok(match &self.qualifier {
            Some(db) if !table.contains('.') => format!("{}.{}", db, table),
            _ => table.to_string(),
        })
    }

    async fn execute(&mut self, sql: String) -> Result<(), WriterError> {
        info!(dialect = self.dialect.name(), sql = %sql, "Executing SQL");
        self.session.execute(&sql, &[]).await?;
        Ok(())
    }
}

#[async_trait]
impl<S: SqlSession> WriterCommands for SqlWriterCommands<S> {
    async fn create_from_reference(&mut self, reference: &str, table: &str) -> Result<(), WriterError> {
        let sql = self
            .dialect
            .create_from_reference(&self.table(reference)?, &self.table(table)?);
        self.execute(sql).await
    }

    async fn insert(&mut self, table: &str, row: Row) -> Result<(), WriterError> {
        let table = self.table(table)?;
        if !self.buffer.accepts(&table, &row) {
            self.flush().await?;
        }
        self.buffer.push(&table, row)?;
        if self.buffer.is_full() {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), WriterError> {
        let Some(batch) = self.buffer.take() else {
            return Ok(());
        };
        let (sql, params) = self.dialect.insert(&batch);
        debug!(table = %batch.table, rows = batch.rows.len(), params = params.len(), "Flushing insert batch");
        self.session.execute(&sql, &params).await?;
        Ok(())
    }

    async fn is_empty(&mut self, table: &str) -> Result<bool, WriterError> {
        let sql = self.dialect.count(&self.table(table)?);
        match self.session.fetch_scalar_i64(&sql).await? {
            Some(count) => Ok(count == 0),
            None => Err(WriterError::MissingScalarRow(sql)),
        }
    }

    async fn truncate(&mut self, table: &str) -> Result<(), WriterError> {
        let sql = self.dialect.truncate(&self.table(table)?);
        self.execute(sql).await
    }

    async fn delete_all(&mut self, table: &str) -> Result<(), WriterError> {
        let sql = self.dialect.delete_all(&self.table(table)?);
        self.execute(sql).await
    }

    async fn drop_table(&mut self, table: &str) -> Result<(), WriterError> {
        let sql = self.dialect.drop_table(&self.table(table)?);
        self.execute(sql).await
    }

    async fn copy_table(&mut self, from: &str, to: &str) -> Result<(), WriterError> {
        let sql = self.dialect.copy(&self.table(from)?, &self.table(to)?);
        self.execute(sql).await
    }

    async fn introspect_date_columns(
        &mut self,
        table: &str,
    ) -> Result<BTreeMap<String, DateType>, WriterError> {
        let qualified = self.table(table)?;
        let columns = match qualified.split_once('.') {
            Some((schema, bare)) => {
                self.session
                    .fetch_string_pairs(self.dialect.column_types(true), &[bare, schema])
                    .await?
            }
            None => {
                self.session
                    .fetch_string_pairs(self.dialect.column_types(false), &[qualified.as_str()])
                    .await?
            }
        };
        if columns.is_empty() {
            return Err(WriterError::NoColumnMetadata(table.to_string()));
        }

        let dates: BTreeMap<String, DateType> = columns
            .into_iter()
            .filter_map(|(name, native)| self.dialect.date_type(&native).map(|t| (name, t)))
            .collect();
        info!(table = %table, date_columns = dates.len(), "Retrieved date columns");
        Ok(dates)
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        let flushed = self.flush().await;
        let closed = self.session.close().await;
        flushed.and(closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::writer::commands::SinkValue;

    /// Records statements and answers queries from canned values
    #[derive(Default)]
    struct RecordingSession {
        statements: Vec<(String, usize)>,
        count: Option<i64>,
        columns: Vec<(String, String)>,
        lookups: Vec<(String, Vec<String>)>,
        closed: bool,
    }

    #[async_trait]
    impl SqlSession for RecordingSession {
        async fn execute(&mut self, sql: &str, params: &[SinkValue]) -> Result<u64, WriterError> {
            if self.closed {
                return Err(WriterError::SessionClosed);
            }
            self.statements.push((sql.to_string(), params.len()));
            Ok(0)
        }

        async fn fetch_scalar_i64(&mut self, sql: &str) -> Result<Option<i64>, WriterError> {
            self.statements.push((sql.to_string(), 0));
            Ok(self.count)
        }

        async fn fetch_string_pairs(
            &mut self,
            sql: &str,
            params: &[&str],
        ) -> Result<Vec<(String, String)>, WriterError> {
            self.lookups
                .push((sql.to_string(), params.iter().map(|p| p.to_string()).collect()));
            Ok(self.columns.clone())
        }

        async fn close(&mut self) -> Result<(), WriterError> {
            self.closed = true;
            Ok(())
        }
    }

    fn row(id: i64) -> Row {
        Row::new().with("id", SinkValue::Int(id))
    }

    #[tokio::test]
    async fn test_batches_issue_ceil_n_over_b_statements() {
        let mut commands = SqlWriterCommands::new(RecordingSession::default(), Dialect::MySql, 3);
        for id in 0..7 {
            commands.insert("stage", row(id)).await.unwrap();
        }
        assert_eq!(commands.session().statements.len(), 2);
        commands.flush().await.unwrap();

        let statements = &commands.session().statements;
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0].0, "INSERT INTO stage (`id`) VALUES (?), (?), (?)");
        assert_eq!(statements[2].1, 1);
    }

    #[tokio::test]
    async fn test_close_flushes_partial_batch() {
        let mut commands = SqlWriterCommands::new(RecordingSession::default(), Dialect::Postgres, 30);
        commands.insert("stage", row(1)).await.unwrap();
        commands.close().await.unwrap();

        assert_eq!(commands.session().statements.len(), 1);
        assert!(commands.session().closed);
    }

    #[tokio::test]
    async fn test_table_switch_flushes_first() {
        let mut commands = SqlWriterCommands::new(RecordingSession::default(), Dialect::MySql, 30)
            .with_qualifier(Some("sales".to_string()));
        commands.insert("a", row(1)).await.unwrap();
        commands.insert("b", row(2)).await.unwrap();
        commands.flush().await.unwrap();

        let sqls: Vec<_> = commands.session().statements.iter().map(|s| s.0.as_str()).collect();
        assert_eq!(
            sqls,
            vec![
                "INSERT INTO sales.a (`id`) VALUES (?)",
                "INSERT INTO sales.b (`id`) VALUES (?)",
            ]
        );
    }

    #[tokio::test]
    async fn test_is_empty_requires_a_row() {
        let mut session = RecordingSession::default();
        session.count = Some(2);
        let mut commands = SqlWriterCommands::new(session, Dialect::MySql, 30);
        assert!(!commands.is_empty("orders").await.unwrap());

        let mut commands = SqlWriterCommands::new(RecordingSession::default(), Dialect::MySql, 30);
        assert!(matches!(
            commands.is_empty("orders").await,
            Err(WriterError::MissingScalarRow(_))
        ));
    }

    #[tokio::test]
    async fn test_introspection_filters_by_allow_list() {
        let mut session = RecordingSession::default();
        session.columns = vec![
            ("id".into(), "bigint".into()),
            ("created".into(), "datetime".into()),
            ("day".into(), "date".into()),
        ];
        let mut commands = SqlWriterCommands::new(session, Dialect::MySql, 30);
        let dates = commands.introspect_date_columns("orders").await.unwrap();
        assert_eq!(dates.len(), 2);
        assert_eq!(dates.get("created"), Some(&DateType::Time));
        assert_eq!(dates.get("day"), Some(&DateType::Date));

        let mut commands = SqlWriterCommands::new(RecordingSession::default(), Dialect::MySql, 30);
        assert!(matches!(
            commands.introspect_date_columns("missing").await,
            Err(WriterError::NoColumnMetadata(_))
        ));
    }

    #[tokio::test]
    async fn test_introspection_binds_schema_of_qualified_table() {
        let mut session = RecordingSession::default();
        session.columns = vec![("placed".into(), "timestamp".into())];
        let mut commands = SqlWriterCommands::new(session, Dialect::MySql, 30)
            .with_qualifier(Some("sales".to_string()));

        commands.introspect_date_columns("archive.orders").await.unwrap();
        commands.introspect_date_columns("orders").await.unwrap();

        let lookups = &commands.session().lookups;
        assert!(lookups[0].0.ends_with("table_schema = ?"));
        assert_eq!(lookups[0].1, vec!["orders".to_string(), "archive".to_string()]);
        assert_eq!(lookups[1].1, vec!["orders".to_string(), "sales".to_string()]);

        let mut commands = SqlWriterCommands::new(RecordingSession::default(), Dialect::Postgres, 30);
        let _ = commands.introspect_date_columns("orders").await;
        let lookups = &commands.session().lookups;
        assert!(lookups[0].0.ends_with("current_schema()"));
        assert_eq!(lookups[0].1, vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_table_names() {
        let mut commands = SqlWriterCommands::new(RecordingSession::default(), Dialect::MySql, 30);
        assert!(matches!(
            commands.drop_table("x; DROP DATABASE y").await,
            Err(WriterError::InvalidIdentifier(_))
        ));
        assert!(commands.session().statements.is_empty());
    }
}
