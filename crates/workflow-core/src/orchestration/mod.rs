pub mod limiter;
pub mod report;
pub mod scheduler;

pub use limiter::{ConcurrencyLimiter, WorkItem};
pub use report::{
    NullReporter, RecordingReporter, ReporterEvent, TaskReport, UnitReport, WorkflowReport,
    WorkflowReporter, format_elapsed,
};
pub use scheduler::Scheduler;

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
