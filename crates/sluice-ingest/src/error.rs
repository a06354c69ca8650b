//! Error taxonomy for the ingestion pipeline
//!
//! Each stage owns an error enum; [`IngestError`] aggregates them for the
//! job coordinator. Structural problems (unknown field, duplicate selection,
//! missing scalar row) are always errors and never defaulted.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Boxed cause carried by prepare failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a source protocol implementation
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source query failed: {0}")]
    Query(String),

    #[error("Source call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected source response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Step of `Extractor::build` that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareStage {
    Configuration,
    Schema,
    HighWatermark,
    RecordCount,
}

impl fmt::Display for PrepareStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareStage::Configuration => write!(f, "invalid extract configuration"),
            PrepareStage::Schema => write!(f, "failed to get schema"),
            PrepareStage::HighWatermark => write!(f, "failed to get high watermark"),
            PrepareStage::RecordCount => write!(f, "failed to get record count"),
        }
    }
}

/// Extraction engine errors
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Fatal: the partition aborts before any record is pulled
    #[error("Failed to prepare extract {work_unit}: {stage}: {source}")]
    Prepare {
        work_unit: String,
        stage: PrepareStage,
        source: BoxError,
    },

    /// One fetch attempt failed; records already returned stay valid
    #[error("Failed to fetch records for {work_unit}: {source}")]
    Pull {
        work_unit: String,
        source: SourceError,
    },

    #[error("Extractor {work_unit} cannot {operation} while {phase}")]
    InvalidPhase {
        work_unit: String,
        operation: &'static str,
        phase: &'static str,
    },
}

/// Schema projection errors, raised before any record-level work
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("Duplicate field selection detected: {0}")]
    DuplicatePath(String),

    #[error("Field '{path}' does not exist under schema {schema}")]
    UnknownField { path: String, schema: String },

    #[error("Field '{path}' is not a record and cannot have nested selections")]
    NotARecord { path: String },

    #[error("Named type {name} is selected with two different shapes (again at '{path}')")]
    ConflictingNamedType { name: String, path: String },

    #[error("Projected schema is invalid at '{path}': {message}")]
    InvalidSchema { path: String, message: String },

    #[error("No fields selected; {0} is required")]
    NoFieldsSelected(String),

    #[error("Record does not match projected schema at '{path}': {message}")]
    RecordMismatch { path: String, message: String },
}

/// Sink command errors; a failed batch is failed as a whole
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Sink statement failed [{sql}]: {source}")]
    Statement { sql: String, source: sqlx::Error },

    #[error("Expected one row from [{0}] but the sink returned none")]
    MissingScalarRow(String),

    #[error("Failed to connect to sink: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Sink connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Failed to close sink session: {0}")]
    Disconnect(#[source] sqlx::Error),

    #[error("Invalid table identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("No column metadata returned for table {0}")]
    NoColumnMetadata(String),

    #[error("Row does not fit table {table}: {message}")]
    RowMismatch { table: String, message: String },

    #[error("Sink session already closed")]
    SessionClosed,

    #[error("Invalid sink configuration: {0}")]
    Config(String),
}

impl WriterError {
    pub fn statement(sql: impl Into<String>, source: sqlx::Error) -> Self {
        WriterError::Statement {
            sql: sql.into(),
            source,
        }
    }
}

/// Run state and property errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Missing required property {0}")]
    Missing(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Invalid watermark range: low {low} is greater than high {high}")]
    InvalidRange { low: i64, high: i64 },

    #[error("State store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One-time initializer errors
#[derive(Error, Debug)]
pub enum InitializerError {
    #[error("Initializer {name} failed: {source}")]
    Writer { name: String, source: WriterError },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Failed to encode initializer output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Aggregate error for the job coordinator and binaries
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Writer(#[from] WriterError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Initializer(#[from] InitializerError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Task for {work_unit} was cancelled")]
    Cancelled { work_unit: String },

    #[error("Task for {work_unit} panicked: {message}")]
    TaskPanicked { work_unit: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_error_message_names_stage_and_cause() {
        let err = ExtractError::Prepare {
            work_unit: "[sales_orders_0_1]".to_string(),
            stage: PrepareStage::HighWatermark,
            source: Box::new(SourceError::Query("max() failed".to_string())),
        };
        let message = err.to_string();
        assert!(message.contains("[sales_orders_0_1]"));
        assert!(message.contains("failed to get high watermark"));
        assert!(message.contains("max() failed"));
    }

    #[test]
    fn test_unknown_field_message_names_path() {
        let err = ProjectionError::UnknownField {
            path: "address.zip".to_string(),
            schema: "address".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Field 'address.zip' does not exist under schema address"
        );
    }
}
