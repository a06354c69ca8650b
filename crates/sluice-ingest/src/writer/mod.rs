//! Staged, buffered sink writes
//!
//! [`WriterCommands`] is the command set every sink family implements.
//! SQL families share [`SqlWriterCommands`] over a [`SqlSession`]; the
//! in-memory family backs dry runs and tests.

pub mod buffered;
pub mod commands;
pub mod dialect;
pub mod factory;
pub mod memory;
pub mod publish;
pub mod row;
pub mod session;
pub mod sql;
pub mod staging;

pub use buffered::{InsertBuffer, PendingBatch, DEFAULT_BATCH_SIZE};
pub use commands::{validate_table_name, DateType, Row, SinkValue, WriterCommands};
pub use dialect::Dialect;
pub use factory::{CommandsFactory, MemoryCommandsFactory, SinkKind, SqlCommandsFactory};
pub use memory::{MemoryDatabase, MemoryWriterCommands};
pub use publish::{publish_staging, PublishMode, PublishOutcome, Publisher, StagingPublisher};
pub use row::RowConverter;
pub use session::{MySqlSession, PgSession, SqlSession};
pub use sql::SqlWriterCommands;
pub use staging::{target_table, StagingWriter};
