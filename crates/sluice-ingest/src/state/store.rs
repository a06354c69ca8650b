//! Persistence of work-unit states between job runs
//!
//! The previous run's committed states decide where the next run starts:
//! each partition resumes from the highest watermark it actually reached.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::work_unit::{TaskStatus, WorkUnitState};
use crate::error::StateError;

const CURRENT_FILE: &str = "current.json";

/// Storage for the states of a job's most recent run
#[async_trait]
pub trait StateStore: Send + Sync {
    /// States committed by the previous run; empty on first run
    async fn load_previous(&self, job: &str) -> Result<Vec<WorkUnitState>, StateError>;

    /// Replace the job's committed states
    async fn commit(&self, job: &str, states: &[WorkUnitState]) -> Result<(), StateError>;
}

/// JSON files under `<root>/<job>/current.json`
pub struct FsStateStore {
    root: PathBuf,
}

impl FsStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_file(&self, job: &str) -> PathBuf {
        self.root.join(job).join(CURRENT_FILE)
    }
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn load_previous(&self, job: &str) -> Result<Vec<WorkUnitState>, StateError> {
        let path = self.job_file(job);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(job = %job, path = %path.display(), "No previous state");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let states: Vec<WorkUnitState> = serde_json::from_slice(&bytes)?;
        debug!(job = %job, work_units = states.len(), "Loaded previous state");
        Ok(states)
    }

    async fn commit(&self, job: &str, states: &[WorkUnitState]) -> Result<(), StateError> {
        let path = self.job_file(job);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(states)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        info!(job = %job, work_units = states.len(), path = %path.display(), "Committed job state");
        Ok(())
    }
}

/// Process-local store for tests and dry runs
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    jobs: Arc<Mutex<HashMap<String, Vec<WorkUnitState>>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_previous(&self, job: &str) -> Result<Vec<WorkUnitState>, StateError> {
        Ok(self.jobs.lock().await.get(job).cloned().unwrap_or_default())
    }

    async fn commit(&self, job: &str, states: &[WorkUnitState]) -> Result<(), StateError> {
        self.jobs.lock().await.insert(job.to_string(), states.to_vec());
        Ok(())
    }
}

/// Low watermark for each partition key in the next run
///
/// Only committed units advance. A partition with any other unit restarts
/// from the smallest low watermark among those units, so nothing they covered
/// is skipped. Fully committed partitions continue from the largest high
/// watermark reached.
pub fn next_low_watermarks(previous: &[WorkUnitState]) -> BTreeMap<String, i64> {
    let mut succeeded: BTreeMap<String, i64> = BTreeMap::new();
    let mut failed: BTreeMap<String, i64> = BTreeMap::new();

    for state in previous {
        let key = state.work_unit.partition_key();
        if state.status == TaskStatus::Committed {
            let reached = state
                .actual_high_watermark
                .unwrap_or(state.work_unit.high_watermark);
            let entry = succeeded.entry(key).or_insert(reached);
            *entry = (*entry).max(reached);
        } else {
            let low = state.work_unit.low_watermark;
            let entry = failed.entry(key).or_insert(low);
            *entry = (*entry).min(low);
        }
    }

    succeeded.extend(failed);
    succeeded
}
