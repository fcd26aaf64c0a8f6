use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{CoreError, CoreErrorKind};

pub type Params = Map<String, Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    /// Config file name, resolved inside every workspace.
    pub entry: String,
    #[serde(default)]
    pub params: Params,
    pub cache_file: PathBuf,
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub workspaces: Vec<PathBuf>,
}

impl WorkflowConfig {
    pub fn new(
        entry: impl Into<String>,
        cache_file: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            entry: entry.into(),
            params: Params::new(),
            cache_file: cache_file.into(),
            cache_dir: cache_dir.into(),
            workspaces: Vec::new(),
        }
    }

    pub fn workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspaces.push(workspace.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn config_file(&self, workspace: &Path) -> PathBuf {
        workspace.join(&self.entry)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.entry.is_empty() {
            return Err(invalid_input("workflow entry must not be empty"));
        }
        if Path::new(&self.entry).is_absolute() {
            return Err(invalid_input(
                "workflow entry must be relative to each workspace",
            ));
        }
        if !self.cache_file.is_absolute() {
            return Err(invalid_input(format!(
                "cache file '{}' must be an absolute path",
                self.cache_file.display()
            )));
        }
        if !self.cache_dir.is_absolute() {
            return Err(invalid_input(format!(
                "cache directory '{}' must be an absolute path",
                self.cache_dir.display()
            )));
        }
        if let Some(workspace) = self.workspaces.iter().find(|path| !path.is_absolute()) {
            return Err(invalid_input(format!(
                "workspace '{}' must be an absolute path",
                workspace.display()
            )));
        }
        Ok(())
    }
}

fn invalid_input(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidInput, message)
}
