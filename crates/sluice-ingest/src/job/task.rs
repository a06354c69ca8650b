//! One work unit's extract, project and write pipeline

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExtractError, IngestError};
use crate::extract::{Extractor, SourceProtocol};
use crate::projection::{FieldPickConverter, RecordSchema};
use crate::state::{keys, Branch, State, TaskStatus, WorkUnitState};
use crate::writer::{target_table, CommandsFactory, RowConverter, StagingWriter};

/// Working-state key holding the number of records pulled
pub const TASK_RECORDS_READ: &str = "task.records.read";

/// What a partition task hands back to the coordinator
#[derive(Debug)]
pub struct TaskResult {
    pub state: WorkUnitState,
    pub records: u64,
    pub error: Option<IngestError>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

struct BranchPipeline {
    branch: Branch,
    projector: Option<FieldPickConverter>,
    writer: StagingWriter,
}

pub struct PartitionTask<P>
where
    P: SourceProtocol<Schema = RecordSchema, Record = Value>,
{
    extractor: Extractor<P>,
    factory: Arc<dyn CommandsFactory>,
    cancel: CancellationToken,
    branches: Vec<BranchPipeline>,
    records: u64,
}

impl<P> PartitionTask<P>
where
    P: SourceProtocol<Schema = RecordSchema, Record = Value>,
{
    pub fn new(protocol: P, state: WorkUnitState, factory: Arc<dyn CommandsFactory>, cancel: CancellationToken) -> Self {
        Self {
            extractor: Extractor::new(protocol, state),
            factory,
            cancel,
            branches: Vec::new(),
            records: 0,
        }
    }

    /// Run to completion; writers are flushed and closed on every exit path
    pub async fn run(mut self) -> TaskResult {
        let name = self.extractor.work_unit_name().to_string();
        let outcome = self.pump().await;
        let closed = self.close_writers().await;

        let error = match (outcome, closed) {
            (Err(e), _) => Some(e),
            (Ok(()), Err(e)) => Some(e),
            (Ok(()), Ok(())) => None,
        };

        let mut state = match &error {
            None => {
                let mut state = self.extractor.close();
                state.status = TaskStatus::Succeeded;
                state
            }
            Some(e) => {
                error!(work_unit = %name, error = %e, "Partition task failed");
                let mut state = self.extractor.abandon();
                state.status = TaskStatus::Failed;
                state
            }
        };
        state.set_prop(TASK_RECORDS_READ, self.records);

        info!(work_unit = %name, records = self.records, status = state.status.as_str(), "Partition task finished");
        TaskResult {
            state,
            records: self.records,
            error,
        }
    }

    async fn pump(&mut self) -> Result<(), IngestError> {
        self.extractor.build().await?;
        let schema = self
            .extractor
            .schema()
            .cloned()
            .ok_or_else(|| ExtractError::InvalidPhase {
                work_unit: self.extractor.work_unit_name().to_string(),
                operation: "open writers",
                phase: self.extractor.phase(),
            })?;
        let state = self.extractor.work_unit_state().work_unit.state.clone();
        self.open_branches(&state, &schema).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(work_unit = %self.extractor.work_unit_name(), records = self.records, "Cancelled, stopping pull");
                    return Err(IngestError::Cancelled {
                        work_unit: self.extractor.work_unit_name().to_string(),
                    });
                }
                next = self.extractor.read_record() => next?,
            };
            let Some(record) = next else {
                break;
            };
            self.records += 1;

            for pipeline in &mut self.branches {
                match &pipeline.projector {
                    Some(projector) => pipeline.writer.write(&projector.convert_record(&record)?).await?,
                    None => pipeline.writer.write(&record).await?,
                }
            }
        }
        Ok(())
    }

    async fn open_branches(&mut self, state: &State, schema: &RecordSchema) -> Result<(), IngestError> {
        for branch in Branch::all(state)? {
            let converters = state.get_list(&branch.key(keys::CONVERTER_CLASSES));
            let projector = if converters
                .iter()
                .any(|c| c.eq_ignore_ascii_case(keys::CONVERTER_FIELD_PICK))
            {
                let mut projector = FieldPickConverter::from_state(state, branch)?;
                projector.convert_schema(schema)?;
                Some(projector)
            } else {
                None
            };

            let converter = RowConverter::from_state(state, branch)?;
            let table = target_table(state, branch)?;
            let commands = self.factory.open(state, branch).await?;
            debug!(work_unit = %self.extractor.work_unit_name(), branch = branch.id, table = %table, "Opened branch writer");
            self.branches.push(BranchPipeline {
                branch,
                projector,
                writer: StagingWriter::new(commands, table, converter),
            });
        }
        Ok(())
    }

    /// Closes every branch writer; the first failure is returned
    async fn close_writers(&mut self) -> Result<(), IngestError> {
        let mut first: Option<IngestError> = None;
        for pipeline in self.branches.drain(..) {
            let table = pipeline.writer.table().to_string();
            match pipeline.writer.close().await {
                Ok(written) => debug!(branch = pipeline.branch.id, table = %table, written, "Closed branch writer"),
                Err(e) => {
                    warn!(branch = pipeline.branch.id, table = %table, error = %e, "Failed to close branch writer");
                    first.get_or_insert(e.into());
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
