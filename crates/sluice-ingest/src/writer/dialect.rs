//! SQL text for each supported sink family

use super::buffered::PendingBatch;
use super::commands::{DateType, SinkValue};

/// Bind parameters allowed in one statement by both MySQL and PostgreSQL
pub const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    pub fn quote_column(&self, column: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", column.replace('`', "``")),
            Dialect::Postgres => format!("\"{}\"", column.replace('"', "\"\"")),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${}", index),
        }
    }

    pub fn create_from_reference(&self, reference: &str, table: &str) -> String {
        match self {
            Dialect::MySql => format!("CREATE TABLE {} SELECT * FROM {} WHERE 1=2", table, reference),
            Dialect::Postgres => format!("CREATE TABLE {} (LIKE {} INCLUDING ALL)", table, reference),
        }
    }

    pub fn count(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", table)
    }

    pub fn truncate(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {}", table)
    }

    pub fn delete_all(&self, table: &str) -> String {
        format!("DELETE FROM {}", table)
    }

    pub fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", table)
    }

    pub fn copy(&self, from: &str, to: &str) -> String {
        format!("INSERT INTO {} SELECT * FROM {}", to, from)
    }

    /// Query returning `(column_name, column_type)`
    ///
    /// Binds the bare table name, then the schema when `qualified`; otherwise
    /// the session's current database is searched.
    pub fn column_types(&self, qualified: bool) -> &'static str {
        match (self, qualified) {
            (Dialect::MySql, false) => {
                "SELECT CAST(column_name AS CHAR), CAST(column_type AS CHAR) \
                 FROM information_schema.columns \
                 WHERE table_name = ? AND table_schema = DATABASE()"
            }
            (Dialect::MySql, true) => {
                "SELECT CAST(column_name AS CHAR), CAST(column_type AS CHAR) \
                 FROM information_schema.columns \
                 WHERE table_name = ? AND table_schema = ?"
            }
            (Dialect::Postgres, false) => {
                "SELECT column_name::text, data_type::text \
                 FROM information_schema.columns \
                 WHERE table_name = $1 AND table_schema = current_schema()"
            }
            (Dialect::Postgres, true) => {
                "SELECT column_name::text, data_type::text \
                 FROM information_schema.columns \
                 WHERE table_name = $1 AND table_schema = $2"
            }
        }
    }

    /// Allow-list of temporal native types; anything else is not a date column
    pub fn date_type(&self, native_type: &str) -> Option<DateType> {
        let native = native_type.trim().to_uppercase();
        match self {
            Dialect::MySql => match native.as_str() {
                "DATE" => Some(DateType::Date),
                "DATETIME" => Some(DateType::Time),
                "TIME" => Some(DateType::Time),
                "TIMESTAMP" => Some(DateType::Timestamp),
                _ => None,
            },
            Dialect::Postgres => match native.as_str() {
                "DATE" => Some(DateType::Date),
                "TIME WITHOUT TIME ZONE" | "TIME WITH TIME ZONE" => Some(DateType::Time),
                "TIMESTAMP WITHOUT TIME ZONE" | "TIMESTAMP WITH TIME ZONE" => {
                    Some(DateType::Timestamp)
                }
                _ => None,
            },
        }
    }

    /// Multi-row INSERT for a batch plus its bind parameters
    ///
    /// NULLs are written as literals so untyped nulls never need binding.
    pub fn insert(&self, batch: &PendingBatch) -> (String, Vec<SinkValue>) {
        let columns = batch
            .columns
            .iter()
            .map(|c| self.quote_column(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut params = Vec::new();
        let mut tuples = Vec::with_capacity(batch.rows.len());
        for row in &batch.rows {
            let mut slots = Vec::with_capacity(row.len());
            for value in row {
                if value.is_null() {
                    slots.push("NULL".to_string());
                } else {
                    params.push(value.clone());
                    slots.push(self.placeholder(params.len()));
                }
            }
            tuples.push(format!("({})", slots.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            batch.table,
            columns,
            tuples.join(", ")
        );
        (sql, params)
    }
}
