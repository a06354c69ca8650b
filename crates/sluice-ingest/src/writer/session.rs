//! Live sink sessions over a single sqlx connection

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnection};
use sqlx::postgres::{PgArguments, PgConnection, Postgres};
use sqlx::query::Query;
use sqlx::Connection;
use std::time::Duration;
use tracing::debug;

use super::commands::SinkValue;
use crate::error::WriterError;

/// Minimal statement surface the SQL command families need
#[async_trait]
pub trait SqlSession: Send {
    /// Run a statement, returning affected rows
    async fn execute(&mut self, sql: &str, params: &[SinkValue]) -> Result<u64, WriterError>;

    /// First column of the first row, `None` when no row came back
    async fn fetch_scalar_i64(&mut self, sql: &str) -> Result<Option<i64>, WriterError>;

    /// Two text columns per row, with one bound text parameter
    /// Rows of two text columns, binding `params` in order
    async fn fetch_string_pairs(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<(String, String)>, WriterError>;

    async fn close(&mut self) -> Result<(), WriterError>;
}

async fn connect_with_timeout<C: Connection>(url: &str, timeout: Duration) -> Result<C, WriterError> {
    tokio::time::timeout(timeout, C::connect(url))
        .await
        .map_err(|_| WriterError::ConnectTimeout(timeout))?
        .map_err(WriterError::Connect)
}

fn bind_mysql<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SinkValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SinkValue::Null => query.bind(None::<String>),
        SinkValue::Bool(v) => query.bind(*v),
        SinkValue::Int(v) => query.bind(*v),
        SinkValue::Float(v) => query.bind(*v),
        SinkValue::Text(v) => query.bind(v.clone()),
        SinkValue::Date(v) => query.bind(*v),
        SinkValue::Time(v) => query.bind(*v),
        SinkValue::Timestamp(v) => query.bind(*v),
    }
}

fn bind_pg<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SinkValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SinkValue::Null => query.bind(None::<String>),
        SinkValue::Bool(v) => query.bind(*v),
        SinkValue::Int(v) => query.bind(*v),
        SinkValue::Float(v) => query.bind(*v),
        SinkValue::Text(v) => query.bind(v.clone()),
        SinkValue::Date(v) => query.bind(*v),
        SinkValue::Time(v) => query.bind(*v),
        SinkValue::Timestamp(v) => query.bind(*v),
    }
}

pub struct MySqlSession {
    conn: Option<MySqlConnection>,
}

impl MySqlSession {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, WriterError> {
        let conn = connect_with_timeout::<MySqlConnection>(url, timeout).await?;
        debug!("Opened MySQL sink session");
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut MySqlConnection, WriterError> {
        self.conn.as_mut().ok_or(WriterError::SessionClosed)
    }
}

#[async_trait]
impl SqlSession for MySqlSession {
    async fn execute(&mut self, sql: &str, params: &[SinkValue]) -> Result<u64, WriterError> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_mysql(query, value);
        }
        let result = query
            .execute(self.conn()?)
            .await
            .map_err(|e| WriterError::statement(sql, e))?;
        Ok(result.rows_affected())
    }

    async fn fetch_scalar_i64(&mut self, sql: &str) -> Result<Option<i64>, WriterError> {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| WriterError::statement(sql, e))
    }

    async fn fetch_string_pairs(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<(String, String)>, WriterError> {
        let mut query = sqlx::query_as::<_, (String, String)>(sql);
        for param in params {
            query = query.bind(*param);
        }
        query
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| WriterError::statement(sql, e))
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(WriterError::Disconnect)?;
        }
        Ok(())
    }
}

pub struct PgSession {
    conn: Option<PgConnection>,
}

impl PgSession {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, WriterError> {
        let conn = connect_with_timeout::<PgConnection>(url, timeout).await?;
        debug!("Opened PostgreSQL sink session");
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut PgConnection, WriterError> {
        self.conn.as_mut().ok_or(WriterError::SessionClosed)
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn execute(&mut self, sql: &str, params: &[SinkValue]) -> Result<u64, WriterError> {
        let mut query = sqlx::query(sql);
        for value in params {
            query = bind_pg(query, value);
        }
        let result = query
            .execute(self.conn()?)
            .await
            .map_err(|e| WriterError::statement(sql, e))?;
        Ok(result.rows_affected())
    }

    async fn fetch_scalar_i64(&mut self, sql: &str) -> Result<Option<i64>, WriterError> {
        sqlx::query_scalar::<_, i64>(sql)
            .fetch_optional(self.conn()?)
            .await
            .map_err(|e| WriterError::statement(sql, e))
    }

    async fn fetch_string_pairs(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> Result<Vec<(String, String)>, WriterError> {
        let mut query = sqlx::query_as::<_, (String, String)>(sql);
        for param in params {
            query = query.bind(*param);
        }
        query
            .fetch_all(self.conn()?)
            .await
            .map_err(|e| WriterError::statement(sql, e))
    }

    async fn close(&mut self) -> Result<(), WriterError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(WriterError::Disconnect)?;
        }
        Ok(())
    }
}
