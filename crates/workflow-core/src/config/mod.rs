//! Per-workspace task configuration.
//!
//! Every workspace carries one entry file. A [`ConfigLoader`] turns that file
//! into a [`WorkspaceConfig`], which maps task names to a configuration value
//! computed from the workflow's parameter bag.

pub mod json;
pub mod static_loader;

pub use json::{JsonConfigLoader, JsonWorkspaceConfig, resolve_value};
pub use static_loader::{FnWorkspaceConfig, StaticConfigLoader};

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::models::{CoreError, Params};

pub type ConfigResult<T> = Result<T, CoreError>;

pub trait WorkspaceConfig: Send + Sync {
    /// `None` when the file has no entry for `task`.
    fn resolve(&self, task: &str, params: &Params) -> Option<ConfigResult<Value>>;
}

pub trait ConfigLoader: Send + Sync {
    /// `Ok(None)` when no config file exists at `path`.
    fn load(&self, path: &Path) -> ConfigResult<Option<Arc<dyn WorkspaceConfig>>>;
}
