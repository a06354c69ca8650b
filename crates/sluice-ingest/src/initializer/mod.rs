//! One-time, per-job setup broadcast into work unit state
//!
//! The coordinator runs [`Initializer::initialize`] once before any
//! partition task starts. Results are written into each [`WorkUnit`]'s
//! properties, so tasks only ever see them as part of their own input.

pub mod date_columns;
pub mod factory;
pub mod staging;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::InitializerError;
use crate::state::WorkUnit;

pub use date_columns::DateColumnsInitializer;
pub use factory::initializer_for;
pub use staging::StagingTableInitializer;

#[async_trait]
pub trait Initializer: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&mut self, work_units: &mut [WorkUnit]) -> Result<(), InitializerError>;

    /// Release whatever `initialize` acquired; called once the job is done
    async fn close(&mut self) -> Result<(), InitializerError>;
}

/// Used when no transform in the job needs setup
#[derive(Debug, Default)]
pub struct NoopInitializer;

#[async_trait]
impl Initializer for NoopInitializer {
    fn name(&self) -> &str {
        "noop"
    }

    async fn initialize(&mut self, _work_units: &mut [WorkUnit]) -> Result<(), InitializerError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), InitializerError> {
        Ok(())
    }
}

/// Aggregate over per-branch initializers
#[derive(Default)]
pub struct MultiInitializer {
    members: Vec<Box<dyn Initializer>>,
}

impl MultiInitializer {
    pub fn new(members: Vec<Box<dyn Initializer>>) -> Self {
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl Initializer for MultiInitializer {
    fn name(&self) -> &str {
        "multi"
    }

    async fn initialize(&mut self, work_units: &mut [WorkUnit]) -> Result<(), InitializerError> {
        for member in &mut self.members {
            debug!(initializer = member.name(), work_units = work_units.len(), "Running initializer");
            member.initialize(work_units).await?;
        }
        Ok(())
    }

    /// Attempts every member; the first failure is returned after all ran
    async fn close(&mut self) -> Result<(), InitializerError> {
        let mut first: Option<InitializerError> = None;
        for member in &mut self.members {
            if let Err(e) = member.close().await {
                warn!(initializer = member.name(), error = %e, "Failed to close initializer");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
