//! Work units and their per-run state

use serde::{Deserialize, Serialize};

use super::{keys, State};
use crate::error::StateError;

/// Watermark value meaning "no bound"
pub const UNSET_WATERMARK: i64 = -1;

/// Partition descriptor handed to one task
///
/// Source identifiers, delta fields, flags and branch settings live in
/// `state`; the watermark window is kept as typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// `<job>_<time>_<seq>`
    pub id: String,
    pub state: State,
    pub low_watermark: i64,
    pub high_watermark: i64,
}

impl WorkUnit {
    pub fn new(job: &str, seq: usize, state: State) -> Self {
        let time = chrono::Utc::now().format("%Y%m%d%H%M%S");
        Self {
            id: format!("{}_{}_{}", job, time, seq),
            state,
            low_watermark: UNSET_WATERMARK,
            high_watermark: UNSET_WATERMARK,
        }
    }

    pub fn with_id(id: impl Into<String>, state: State) -> Self {
        Self {
            id: id.into(),
            state,
            low_watermark: UNSET_WATERMARK,
            high_watermark: UNSET_WATERMARK,
        }
    }

    pub fn with_watermarks(mut self, low: i64, high: i64) -> Self {
        self.low_watermark = low;
        self.high_watermark = high;
        self
    }

    pub fn schema(&self) -> &str {
        self.state.get(keys::SOURCE_SCHEMA).unwrap_or("")
    }

    pub fn entity(&self) -> &str {
        self.state.get(keys::SOURCE_ENTITY).unwrap_or("")
    }

    pub fn is_full_dump(&self) -> bool {
        self.state.get_bool(keys::EXTRACT_IS_FULL)
    }

    /// Key under which watermarks carry over between runs
    pub fn partition_key(&self) -> String {
        format!("{}.{}", self.schema(), self.entity())
    }

    /// `[<schema>_<entity>_<seq>_<time>]`
    pub fn display_name(&self) -> String {
        let mut parts = self.id.rsplit('_');
        let seq = parts.next().unwrap_or("0");
        let time = parts.next().unwrap_or("0");
        format!("[{}_{}_{}_{}]", self.schema(), self.entity(), seq, time)
    }

    /// low <= high whenever both bounds are set
    pub fn validate_range(&self) -> Result<(), StateError> {
        if self.low_watermark >= 0
            && self.high_watermark >= 0
            && self.low_watermark > self.high_watermark
        {
            return Err(StateError::InvalidRange {
                low: self.low_watermark,
                high: self.high_watermark,
            });
        }
        Ok(())
    }
}

/// Outcome of one work unit in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
    Committed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Committed => "committed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Committed)
    }
}

/// Work unit plus everything the run learned about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnitState {
    pub work_unit: WorkUnit,
    /// Properties produced while running
    #[serde(default)]
    pub working_state: State,
    /// High watermark computed by the extractor; `None` until closed
    pub actual_high_watermark: Option<i64>,
    pub status: TaskStatus,
}

impl WorkUnitState {
    pub fn new(work_unit: WorkUnit) -> Self {
        Self {
            work_unit,
            working_state: State::new(),
            actual_high_watermark: None,
            status: TaskStatus::Pending,
        }
    }

    /// Working-state value, falling back to the work unit's own properties
    pub fn get_prop(&self, key: &str) -> Option<&str> {
        self.working_state
            .get(key)
            .or_else(|| self.work_unit.state.get(key))
    }

    pub fn set_prop(&mut self, key: impl Into<String>, value: impl ToString) {
        self.working_state.set_prop(key, value);
    }

    pub fn display_name(&self) -> String {
        self.work_unit.display_name()
    }
}
