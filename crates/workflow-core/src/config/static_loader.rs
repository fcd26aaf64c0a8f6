use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::config::{ConfigLoader, ConfigResult, WorkspaceConfig};
use crate::models::Params;

type TaskConfigFn = Arc<dyn Fn(&Params) -> ConfigResult<Value> + Send + Sync>;

/// Workspace configuration assembled in code, one closure per task name.
#[derive(Clone, Default)]
pub struct FnWorkspaceConfig {
    tasks: HashMap<String, TaskConfigFn>,
}

impl FnWorkspaceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(
        mut self,
        name: impl Into<String>,
        resolve: impl Fn(&Params) -> ConfigResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.tasks.insert(name.into(), Arc::new(resolve));
        self
    }
}

impl WorkspaceConfig for FnWorkspaceConfig {
    fn resolve(&self, task: &str, params: &Params) -> Option<ConfigResult<Value>> {
        self.tasks.get(task).map(|resolve| resolve(params))
    }
}

/// Serves pre-built configs keyed by the config file path the scheduler asks
/// for. Paths without an entry behave like missing files.
#[derive(Clone, Default)]
pub struct StaticConfigLoader {
    configs: HashMap<PathBuf, Arc<dyn WorkspaceConfig>>,
}

impl StaticConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        mut self,
        path: impl Into<PathBuf>,
        config: impl WorkspaceConfig + 'static,
    ) -> Self {
        self.configs.insert(path.into(), Arc::new(config));
        self
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, path: &Path) -> ConfigResult<Option<Arc<dyn WorkspaceConfig>>> {
        Ok(self.configs.get(path).cloned())
    }
}
