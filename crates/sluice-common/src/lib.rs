//! Sluice Common Library
//!
//! Shared plumbing for the sluice workspace members:
//!
//! - **Error Handling**: the process-level error type for IO, serialization and configuration
//! - **Logging**: `tracing` subscriber setup shared by the binary and integration tests
//!
//! # Example
//!
//! ```no_run
//! use sluice_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, SluiceError};
