use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Skip,
    Warn,
    Error,
    Success,
    #[default]
    Unknown,
}

impl TaskState {
    pub const ALL: [TaskState; 5] = [
        TaskState::Skip,
        TaskState::Warn,
        TaskState::Error,
        TaskState::Success,
        TaskState::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Success => "success",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_error(self) -> bool {
        self == Self::Error
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == value)
            .ok_or_else(|| {
                CoreError::new(
                    CoreErrorKind::ParseFailure,
                    format!("unknown task state '{value}'"),
                )
            })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaskDescriptor {
    pub name: &'static str,
    pub title: &'static str,
    pub max_concurrent: usize,
}

impl TaskDescriptor {
    pub fn new(name: &'static str, title: &'static str) -> Self {
        Self {
            name,
            title,
            max_concurrent: 1,
        }
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }
}

/// Worker count for task types whose units are CPU bound compiler runs.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
