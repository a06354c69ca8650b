//! Running work units as a job

pub mod coordinator;
pub mod task;

pub use coordinator::{JobCoordinator, JobReport, SourceFactory};
pub use task::{PartitionTask, TaskResult, TASK_RECORDS_READ};
