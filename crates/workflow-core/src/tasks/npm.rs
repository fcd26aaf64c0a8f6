use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::Value;

use crate::execution::{CommandSpec, OutputHandler, ProcessExecutor, ProcessSpawnRequest, run_command};
use crate::models::{CoreError, CoreErrorKind, TaskDescriptor, TaskState};
use crate::tasks::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};

pub const NPM_TASK: &str = "npm";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpmEntry {
    pub path: String,
    pub params: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    /// Output is appended here instead of the unit log when set.
    #[serde(default)]
    pub log_file: Option<String>,
}

pub struct NpmTask {
    descriptor: TaskDescriptor,
    executor: Arc<dyn ProcessExecutor>,
}

impl NpmTask {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            descriptor: TaskDescriptor::new(NPM_TASK, "npm commands"),
            executor,
        }
    }

    async fn run_entry(&self, unit: &mut TaskUnit, workspace: &Path, entry: &NpmEntry) -> TaskResult<()> {
        let path = resolve_in_workspace(workspace, &entry.path);
        let command_line = format!("npm {}", entry.params.join(" "));
        match &entry.message {
            Some(message) => unit.highlight(format!("{command_line} - {message}")),
            None => unit.highlight(command_line),
        }
        unit.muted(format!("Execution Path: {}", path.display()));

        let captured = Arc::new(Mutex::new(Vec::new()));
        let handler = match entry.log_file.as_deref() {
            Some(log_file) => {
                let log_path = resolve_in_workspace(workspace, log_file);
                unit.muted(format!("Log File: {}", log_path.display()));
                log_file_handler(&log_path)?
            }
            None => capture_handler(Arc::clone(&captured)),
        };

        let result = run_command(
            self.executor.as_ref(),
            npm_request(&path, &entry.params),
            Some(handler),
        )
        .await;

        let output = captured
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        for line in output.lines().filter(|line| !line.trim().is_empty()) {
            unit.muted(line.to_string());
        }

        if result.is_err()
            && let Some(detail) = &entry.detail
        {
            unit.warn(detail.clone());
        }
        result.map(|_| ())
    }
}

impl Task for NpmTask {
    fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    fn execute<'a>(
        &'a self,
        unit: &'a mut TaskUnit,
        workspace: &'a Path,
        config: Value,
    ) -> TaskFuture<'a> {
        Box::pin(async move {
            let Some(entries) = parse_config::<Vec<NpmEntry>>(NPM_TASK, config)? else {
                unit.muted("no npm commands configured");
                return Ok(TaskState::Skip);
            };

            let mut failed = false;
            for entry in &entries {
                if let Err(error) = self.run_entry(unit, workspace, entry).await {
                    unit.error(error.message);
                    failed = true;
                }
            }

            Ok(if failed {
                TaskState::Error
            } else {
                TaskState::Success
            })
        })
    }
}

pub fn npm_request(path: &Path, params: &[String]) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        NPM_TASK,
        CommandSpec::new("npm")
            .args(params.iter().cloned())
            .env("NPM_CONFIG_UPDATE_NOTIFIER", "false")
            .env("NPM_CONFIG_FUND", "false")
            .working_dir(path),
    )
}

fn capture_handler(buffer: Arc<Mutex<Vec<u8>>>) -> OutputHandler {
    Box::new(move |_, bytes| {
        if let Ok(mut buffer) = buffer.lock() {
            buffer.extend_from_slice(bytes);
        }
    })
}

fn log_file_handler(path: &Path) -> TaskResult<OutputHandler> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| log_file_error(path, error))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|error| log_file_error(path, error))?;
    Ok(Box::new(move |_, bytes| {
        if let Err(error) = file.write_all(bytes) {
            tracing::warn!(task = NPM_TASK, error = %error, "failed to append npm output to log file");
        }
    }))
}

fn log_file_error(path: &Path, error: std::io::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("failed to open log file '{}': {error}", path.display()),
    )
}
