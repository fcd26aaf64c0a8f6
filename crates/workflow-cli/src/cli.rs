use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::Value;
use workflow_core::models::{CoreError, CoreErrorKind, WorkflowConfig};

const DEFAULT_ENTRY: &str = "workflow.json";
const DEFAULT_STATE_DIR: &str = ".workflow";

#[derive(Debug, Parser)]
#[command(name = "workflow", version, about = "Run cached build tasks across workspaces")]
pub struct Cli {
    /// JSON workflow definition (entry, params, cacheFile, cacheDir, workspaces).
    #[arg(long, env = "WORKFLOW_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Config file name looked up inside every workspace.
    #[arg(long, value_name = "NAME")]
    pub entry: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub cache_file: Option<PathBuf>,

    /// Directory for downloaded artifacts shared between workspaces.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long = "workspace", value_name = "DIR")]
    pub workspaces: Vec<PathBuf>,

    /// Workflow parameter; the value is parsed as JSON and falls back to a string.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// List the registered task types and exit.
    #[arg(long)]
    pub list: bool,

    /// Print per-task results as JSON instead of the progress report.
    #[arg(long)]
    pub json: bool,

    #[arg(value_name = "TASK", required_unless_present = "list")]
    pub tasks: Vec<String>,
}

impl Cli {
    /// Builds the workflow from `--config` (if any) and the flags layered on
    /// top. Relative paths resolve against `cwd`, or against the config
    /// file's directory for paths written inside it.
    pub fn workflow_config(&self, cwd: &Path) -> Result<WorkflowConfig, CoreError> {
        let mut workflow = match &self.config {
            Some(path) => load_workflow_file(&absolute(cwd, path))?,
            None => WorkflowConfig::new(
                DEFAULT_ENTRY,
                cwd.join(DEFAULT_STATE_DIR).join("cache.json"),
                cwd.join(DEFAULT_STATE_DIR).join("files"),
            ),
        };

        if let Some(entry) = &self.entry {
            workflow.entry = entry.clone();
        }
        if let Some(cache_file) = &self.cache_file {
            workflow.cache_file = absolute(cwd, cache_file);
        }
        if let Some(cache_dir) = &self.cache_dir {
            workflow.cache_dir = absolute(cwd, cache_dir);
        }
        workflow
            .workspaces
            .extend(self.workspaces.iter().map(|workspace| absolute(cwd, workspace)));
        if workflow.workspaces.is_empty() {
            workflow.workspaces.push(cwd.to_path_buf());
        }
        for (key, value) in &self.params {
            workflow.params.insert(key.clone(), value.clone());
        }

        workflow.validate()?;
        Ok(workflow)
    }
}

fn load_workflow_file(path: &Path) -> Result<WorkflowConfig, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|error| {
        CoreError::new(
            CoreErrorKind::ConfigLoad,
            format!("failed to read '{}': {error}", path.display()),
        )
    })?;
    let mut workflow: WorkflowConfig = serde_json::from_str(&raw).map_err(|error| {
        CoreError::new(
            CoreErrorKind::ConfigLoad,
            format!("failed to parse '{}': {error}", path.display()),
        )
    })?;

    let base = path.parent().unwrap_or(Path::new("."));
    workflow.cache_file = absolute(base, &workflow.cache_file);
    workflow.cache_dir = absolute(base, &workflow.cache_dir);
    workflow.workspaces = workflow
        .workspaces
        .iter()
        .map(|workspace| absolute(base, workspace))
        .collect();
    Ok(workflow)
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("parameter name is empty in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
