use std::collections::HashMap;
use std::sync::Arc;

use crate::execution::ProcessExecutor;
use crate::models::{CoreError, CoreErrorKind, TaskDescriptor};
use crate::tasks::{
    ChmodTask, DownloadTask, FileTask, LessTask, NpmTask, RemoveTask, RepoTask, Task, TscTask,
};

/// Task types by name. Built once before any workflow runs.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<&'static str, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in task types, all running external tools through `executor`.
    pub fn builtin(executor: Arc<dyn ProcessExecutor>) -> Self {
        let tasks: [Arc<dyn Task>; 8] = [
            Arc::new(TscTask::new(executor.clone())),
            Arc::new(LessTask::new(executor.clone())),
            Arc::new(FileTask::new()),
            Arc::new(RepoTask::with_executor(executor.clone())),
            Arc::new(DownloadTask::with_executor(executor.clone())),
            Arc::new(NpmTask::new(executor)),
            Arc::new(RemoveTask::new()),
            Arc::new(ChmodTask::new()),
        ];

        let mut registry = Self::new();
        for task in tasks {
            let name = task.descriptor().name;
            registry.tasks.insert(name, task);
        }
        registry
    }

    pub fn register(&mut self, task: Arc<dyn Task>) -> Result<(), CoreError> {
        let name = task.descriptor().name;
        if self.tasks.contains_key(name) {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("duplicate task registration for '{name}'"),
            )
            .with_task(name));
        }
        self.tasks.insert(name, task);
        Ok(())
    }

    pub fn with(mut self, task: Arc<dyn Task>) -> Result<Self, CoreError> {
        self.register(task)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn descriptors(&self) -> Vec<TaskDescriptor> {
        let mut descriptors: Vec<_> = self
            .tasks
            .values()
            .map(|task| task.descriptor().clone())
            .collect();
        descriptors.sort_by(|left, right| left.name.cmp(right.name));
        descriptors
    }
}
