//! Sluice Ingest Library
//!
//! Incremental, watermark-driven ingestion of partitioned sources into SQL
//! sinks.
//!
//! # Pipeline
//!
//! - **Extract**: each work unit computes its watermark window, predicates,
//!   schema and expected count, then pulls records one page ahead
//! - **Projection**: a dotted field list prunes nested record schemas and the
//!   records that follow them
//! - **Writer**: rows are buffered into multi-row inserts against a staging
//!   table and published into the final table
//! - **Initializer**: expensive per-job setup runs once and is copied into
//!   every work unit before tasks start
//! - **State**: the high watermark each work unit reached becomes the next
//!   run's low watermark
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sluice_ingest::job::{JobCoordinator, SourceFactory};
//! use sluice_ingest::state::{MemoryStateStore, State, WorkUnit};
//! use sluice_ingest::writer::{MemoryCommandsFactory, MemoryDatabase};
//!
//! async fn run<F: SourceFactory>(sources: F, units: Vec<WorkUnit>) -> anyhow::Result<()> {
//!     let commands = Arc::new(MemoryCommandsFactory::new(MemoryDatabase::new(), 30));
//!     let report = JobCoordinator::new("orders", State::new(), Arc::new(sources), commands, Arc::new(MemoryStateStore::new()))
//!         .with_max_concurrent_tasks(8)
//!         .run(units)
//!         .await?;
//!     tracing::info!(records = report.records, "done");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod extract;
pub mod initializer;
pub mod job;
pub mod projection;
pub mod state;
pub mod writer;

pub use config::SluiceConfig;
pub use error::{IngestError, Result};
pub use job::{JobCoordinator, JobReport, SourceFactory};
pub use state::{State, WorkUnit, WorkUnitState};
