//! Staging to final table publish
//!
//! Each step is its own statement. A failure part way leaves the final
//! table as the last successful statement left it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::commands::WriterCommands;
use super::factory::CommandsFactory;
use crate::error::{StateError, WriterError};
use crate::state::{keys, Branch, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Copy staged rows next to what the final table already holds
    #[default]
    Append,
    /// Delete the final table's rows before copying
    Replace,
}

impl PublishMode {
    pub fn from_state(state: &State, branch: Branch) -> Self {
        if state.get_bool(&branch.key(keys::PUBLISHER_REPLACE_FINAL)) {
            PublishMode::Replace
        } else {
            PublishMode::Append
        }
    }
}

/// Outcome of one staging publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Staging held no rows; the final table was not touched
    SkippedEmpty,
    Copied { replaced: bool },
}

pub async fn publish_staging(
    commands: &mut dyn WriterCommands,
    staging: &str,
    final_table: &str,
    mode: PublishMode,
    drop_staging: bool,
) -> Result<PublishOutcome, WriterError> {
    if commands.is_empty(staging).await? {
        info!(staging = %staging, final_table = %final_table, "Staging table is empty, skipping publish");
        return Ok(PublishOutcome::SkippedEmpty);
    }

    let replaced = mode == PublishMode::Replace;
    if replaced {
        commands.delete_all(final_table).await?;
    }
    commands.copy_table(staging, final_table).await?;
    if drop_staging {
        commands.drop_table(staging).await?;
    }

    info!(staging = %staging, final_table = %final_table, replaced, "Published staging table");
    Ok(PublishOutcome::Copied { replaced })
}

/// Job-level step run after every partition task succeeded
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, state: &State) -> Result<(), WriterError>;
}

/// Publishes every branch whose staging table was prepared by the
/// staging initializer. Dropping staging tables is left to that initializer.
pub struct StagingPublisher {
    factory: Arc<dyn CommandsFactory>,
}

impl StagingPublisher {
    pub fn new(factory: Arc<dyn CommandsFactory>) -> Self {
        Self { factory }
    }
}

fn branch_tables(state: &State, branch: Branch) -> Result<Option<(String, String)>, StateError> {
    let Some(staging) = state.get(&branch.key(keys::WRITER_STAGING_TABLE)) else {
        return Ok(None);
    };
    let final_table = state.require(&branch.key(keys::PUBLISHER_FINAL_TABLE))?;
    Ok(Some((staging.to_string(), final_table.to_string())))
}

#[async_trait]
impl Publisher for StagingPublisher {
    async fn publish(&self, state: &State) -> Result<(), WriterError> {
        let branches = Branch::all(state).map_err(|e| WriterError::Config(e.to_string()))?;
        for branch in branches {
            let tables = branch_tables(state, branch).map_err(|e| WriterError::Config(e.to_string()))?;
            let Some((staging, final_table)) = tables else {
                warn!(branch = branch.id, "No staging table recorded for branch, nothing to publish");
                continue;
            };

            let mode = PublishMode::from_state(state, branch);
            let mut commands = self.factory.open(state, branch).await?;
            let published = publish_staging(commands.as_mut(), &staging, &final_table, mode, false).await;
            let closed = commands.close().await;
            published?;
            closed?;
        }
        Ok(())
    }
}
