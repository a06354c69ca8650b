//! Job-level orchestration
//!
//! Order of a run:
//! 1. resume low watermarks from the previous run's committed state
//! 2. run the initializer once, writing its output into every work unit
//! 3. dispatch partition tasks onto a bounded pool
//! 4. publish when every task succeeded, then close the initializer; work
//!    units that wrote to staging tables are only committed by a publish
//! 5. commit all work unit states

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::task::{PartitionTask, TaskResult};
use crate::config::DEFAULT_MAX_CONCURRENT_TASKS;
use crate::error::{IngestError, Result, SourceError, StateError};
use crate::extract::SourceProtocol;
use crate::initializer::{initializer_for, Initializer};
use crate::projection::RecordSchema;
use crate::state::{keys, next_low_watermarks, Branch, State, StateStore, TaskStatus, WorkUnit, WorkUnitState};
use crate::writer::{CommandsFactory, Publisher, StagingPublisher};

/// Opens a source client for one work unit
#[async_trait]
pub trait SourceFactory: Send + Sync + 'static {
    type Protocol: SourceProtocol<Schema = RecordSchema, Record = Value> + 'static;

    async fn open(&self, work_unit: &WorkUnit) -> std::result::Result<Self::Protocol, SourceError>;
}

/// Summary of one job run
#[derive(Debug, Default)]
pub struct JobReport {
    pub job: String,
    /// States committed for this run, carried-over partitions included
    pub states: Vec<WorkUnitState>,
    pub records: u64,
    pub published: bool,
    pub errors: Vec<String>,
}

impl JobReport {
    fn count(&self, status: TaskStatus) -> usize {
        self.states.iter().filter(|s| s.status == status).count()
    }

    pub fn committed(&self) -> usize {
        self.count(TaskStatus::Committed)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct JobCoordinator<F: SourceFactory> {
    job: String,
    job_state: State,
    sources: Arc<F>,
    commands: Arc<dyn CommandsFactory>,
    store: Arc<dyn StateStore>,
    initializer: Option<Box<dyn Initializer>>,
    publisher: Option<Box<dyn Publisher>>,
    max_concurrent_tasks: usize,
    cancel: CancellationToken,
}

impl<F: SourceFactory> JobCoordinator<F> {
    pub fn new(
        job: impl Into<String>,
        job_state: State,
        sources: Arc<F>,
        commands: Arc<dyn CommandsFactory>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            job: job.into(),
            job_state,
            sources,
            commands,
            store,
            initializer: None,
            publisher: None,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the initializer otherwise derived from the job state
    pub fn with_initializer(mut self, initializer: Box<dyn Initializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    /// Cancelling stops every task's pull loop; writers still flush
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(mut self, mut work_units: Vec<WorkUnit>) -> Result<JobReport> {
        info!(job = %self.job, work_units = work_units.len(), "Starting job");

        let previous = self.store.load_previous(&self.job).await?;
        let carried = resume_watermarks(&previous, &mut work_units);

        let mut initializer = match self.initializer.take() {
            Some(initializer) => initializer,
            None => initializer_for(&self.job_state, self.commands.clone())?,
        };
        if let Err(e) = initializer.initialize(&mut work_units).await {
            error!(job = %self.job, initializer = initializer.name(), error = %e, "Initializer failed");
            self.close_after_failure(&mut *initializer).await;
            return Err(e.into());
        }

        let publish_state = work_units
            .first()
            .map(|u| u.state.clone())
            .unwrap_or_else(|| self.job_state.clone());

        // rows written to a staging table only count once published
        let staged = match has_staging_table(&publish_state) {
            Ok(staged) => staged,
            Err(e) => {
                self.close_after_failure(&mut *initializer).await;
                return Err(e.into());
            }
        };
        if staged && self.publisher.is_none() {
            info!(job = %self.job, "Work units write to staging tables, publishing them on success");
            self.publisher = Some(Box::new(StagingPublisher::new(self.commands.clone())));
        }

        let mut report = JobReport {
            job: self.job.clone(),
            ..Default::default()
        };
        let mut states = self.dispatch(work_units, &mut report).await;

        let all_succeeded = states.iter().all(|s| s.status == TaskStatus::Succeeded);
        match &self.publisher {
            Some(publisher) if all_succeeded => match publisher.publish(&publish_state).await {
                Ok(()) => {
                    report.published = true;
                    mark_committed(&mut states);
                }
                Err(e) => {
                    error!(job = %self.job, error = %e, "Publish failed");
                    report.errors.push(e.to_string());
                }
            },
            Some(_) => warn!(job = %self.job, "Skipping publish, not every task succeeded"),
            None => mark_committed(&mut states),
        }

        if let Err(e) = initializer.close().await {
            warn!(job = %self.job, error = %e, "Failed to close initializer");
            report.errors.push(e.to_string());
        }

        states.extend(carried);
        self.store.commit(&self.job, &states).await?;
        report.states = states;

        info!(
            job = %self.job,
            records = report.records,
            committed = report.committed(),
            failed = report.failed(),
            published = report.published,
            "Finished job"
        );
        Ok(report)
    }

    async fn close_after_failure(&self, initializer: &mut dyn Initializer) {
        if let Err(close) = initializer.close().await {
            warn!(job = %self.job, error = %close, "Failed to close initializer after failure");
        }
    }

    async fn dispatch(&self, work_units: Vec<WorkUnit>, report: &mut JobReport) -> Vec<WorkUnitState> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_tasks));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<WorkUnitState>> = vec![None; work_units.len()];
        let originals = work_units.clone();

        for (index, unit) in work_units.into_iter().enumerate() {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let sources = self.sources.clone();
            let commands = self.commands.clone();
            let cancel = self.cancel.child_token();

            tasks.spawn(async move {
                let _permit = permit;
                let fallback = unit.clone();
                let run = run_partition(sources, commands, cancel, unit);
                let result = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => failed_result(
                        fallback.clone(),
                        IngestError::TaskPanicked {
                            work_unit: fallback.display_name(),
                            message: panic_message(&*panic),
                        },
                    ),
                };
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    report.records += result.records;
                    if let Some(e) = &result.error {
                        report.errors.push(e.to_string());
                    }
                    slots[index] = Some(result.state);
                }
                Err(e) => {
                    error!(job = %self.job, error = %e, "Partition task did not complete");
                    report.errors.push(e.to_string());
                }
            }
        }

        slots
            .into_iter()
            .zip(originals)
            .map(|(slot, unit)| {
                slot.unwrap_or_else(|| {
                    let mut state = WorkUnitState::new(unit);
                    state.status = TaskStatus::Failed;
                    state
                })
            })
            .collect()
    }
}

async fn run_partition<F: SourceFactory>(
    sources: Arc<F>,
    commands: Arc<dyn CommandsFactory>,
    cancel: CancellationToken,
    unit: WorkUnit,
) -> TaskResult {
    match sources.open(&unit).await {
        Ok(protocol) => {
            PartitionTask::new(protocol, WorkUnitState::new(unit), commands, cancel)
                .run()
                .await
        }
        Err(e) => {
            error!(work_unit = %unit.display_name(), error = %e, "Failed to open source");
            failed_result(unit, e.into())
        }
    }
}

fn failed_result(unit: WorkUnit, error: IngestError) -> TaskResult {
    let mut state = WorkUnitState::new(unit);
    state.status = TaskStatus::Failed;
    TaskResult {
        state,
        records: 0,
        error: Some(error),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn has_staging_table(state: &State) -> std::result::Result<bool, StateError> {
    Ok(Branch::all(state)?
        .iter()
        .any(|branch| state.get(&branch.key(keys::WRITER_STAGING_TABLE)).is_some()))
}

fn mark_committed(states: &mut [WorkUnitState]) {
    for state in states.iter_mut().filter(|s| s.status == TaskStatus::Succeeded) {
        state.status = TaskStatus::Committed;
    }
}

/// Apply the previous run's low watermarks and return the states of
/// partitions this run does not cover, so they stay on record
fn resume_watermarks(previous: &[WorkUnitState], work_units: &mut [WorkUnit]) -> Vec<WorkUnitState> {
    let lows = next_low_watermarks(previous);
    let mut covered = HashSet::new();

    for unit in work_units.iter_mut() {
        let key = unit.partition_key();
        if let Some(low) = lows.get(&key) {
            info!(work_unit = %unit.display_name(), low_watermark = *low, "Resuming from previous run");
            unit.low_watermark = *low;
        }
        covered.insert(key);
    }

    previous
        .iter()
        .filter(|s| !covered.contains(&s.work_unit.partition_key()))
        .cloned()
        .collect()
}
