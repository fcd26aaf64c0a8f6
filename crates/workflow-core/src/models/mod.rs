pub mod error;
pub mod task;
pub mod task_log;
pub mod workflow;

pub use error::{CoreError, CoreErrorKind};
pub use task::{TaskDescriptor, TaskState, available_parallelism};
pub use task_log::{TaskLogLevel, TaskLogLine};
pub use workflow::{Params, WorkflowConfig};
