use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{CoreError, CoreErrorKind, TaskDescriptor, TaskLogLevel, TaskLogLine, TaskState};
use crate::persistence::ScopedCache;

pub type TaskResult<T> = Result<T, CoreError>;

pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = TaskResult<TaskState>> + Send + 'a>>;

const DEFAULT_LOG_PREFIX: &str = "    ";

/// A task type. One registered instance serves every workspace; per-workspace
/// state lives in the [`TaskUnit`] handed to `execute`.
pub trait Task: Send + Sync {
    fn descriptor(&self) -> &TaskDescriptor;

    fn execute<'a>(
        &'a self,
        unit: &'a mut TaskUnit,
        workspace: &'a Path,
        config: Value,
    ) -> TaskFuture<'a>;
}

/// One execution of a task against one workspace.
pub struct TaskUnit {
    name: String,
    workspace: PathBuf,
    cache_dir: PathBuf,
    prefix: String,
    logs: Vec<TaskLogLine>,
    cache: ScopedCache,
}

impl TaskUnit {
    pub fn new(workspace: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>, cache: ScopedCache) -> Self {
        Self {
            name: cache.task().to_string(),
            workspace: workspace.into(),
            cache_dir: cache_dir.into(),
            prefix: DEFAULT_LOG_PREFIX.to_string(),
            logs: Vec::new(),
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    pub fn logs(&self) -> &[TaskLogLine] {
        &self.logs
    }

    pub fn into_logs(self) -> Vec<TaskLogLine> {
        self.logs
    }

    pub fn log(&mut self, level: TaskLogLevel, message: impl Into<String>) {
        let message = message.into();
        tracing::trace!(task = %self.name, workspace = %self.workspace.display(), ?level, %message);
        self.logs.push(TaskLogLine::new(level, message));
    }

    pub fn print(&mut self, message: impl Into<String>) {
        self.log(TaskLogLevel::Info, message);
    }

    pub fn highlight(&mut self, message: impl Into<String>) {
        self.log(TaskLogLevel::Highlight, message);
    }

    pub fn muted(&mut self, message: impl Into<String>) {
        self.log(TaskLogLevel::Muted, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.log(TaskLogLevel::Warn, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(TaskLogLevel::Error, message);
    }

    pub fn get_cache(&self, key: &str) -> TaskResult<Value> {
        self.cache.get(key)
    }

    pub fn set_cache(&self, key: &str, value: Value) -> TaskResult<()> {
        self.cache.set(key, value)
    }
}

/// Resolves a config path against the workspace unless it is already absolute.
pub fn resolve_in_workspace(workspace: &Path, path: impl AsRef<Path>) -> PathBuf {
    let candidate = path.as_ref();
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workspace.join(candidate)
    }
}

/// Deserialises a task's config value. `null` means the workspace exported
/// nothing for the task and maps to `Ok(None)`.
pub fn parse_config<T: DeserializeOwned>(task: &str, config: Value) -> TaskResult<Option<T>> {
    if config.is_null() {
        return Ok(None);
    }
    serde_json::from_value(config).map(Some).map_err(|error| {
        CoreError::new(
            CoreErrorKind::ParseFailure,
            format!("invalid '{task}' configuration: {error}"),
        )
        .with_task(task)
    })
}
