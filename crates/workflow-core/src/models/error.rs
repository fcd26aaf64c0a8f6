use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    NotInitialized,
    ConfigLoad,
    ParseFailure,
    Timeout,
    ProcessFailure,
    StorageFailure,
    Network,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task: Option<String>,
    pub workspace: Option<PathBuf>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            workspace: None,
            kind,
            message: message.into(),
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Fills in task/workspace attribution without overriding what the
    /// producing layer already recorded.
    pub fn attribute(self, task: &str, workspace: &std::path::Path) -> Self {
        Self {
            task: self.task.or_else(|| Some(task.to_string())),
            workspace: self.workspace.or_else(|| Some(workspace.to_path_buf())),
            kind: self.kind,
            message: self.message,
        }
    }
}
