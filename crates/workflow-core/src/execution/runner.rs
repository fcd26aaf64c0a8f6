use crate::execution::{
    ExecutionResult, OutputHandler, ProcessExecutor, ProcessExitStatus, ProcessOutput,
    ProcessSpawnRequest, spawn_validated,
};
use crate::models::{CoreError, CoreErrorKind};

const MAX_ERROR_OUTPUT_CHARS: usize = 2_000;

/// Runs a command to completion, streaming output chunks to `on_output`.
///
/// Resolves with the collected output when the process exits with code 0 and
/// fails with [`CoreErrorKind::ProcessFailure`] otherwise. A missing working
/// directory is created first.
pub async fn run_command(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
    on_output: Option<OutputHandler>,
) -> ExecutionResult<ProcessOutput> {
    let task = request.task.clone();
    let command_line = request.command.display_line();

    if let Some(dir) = &request.command.working_dir
        && !dir.exists()
    {
        std::fs::create_dir_all(dir).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ProcessFailure,
                format!(
                    "failed to create working directory '{}': {error}",
                    dir.display()
                ),
            )
            .with_task(task.as_str())
        })?;
    }

    let process = spawn_validated(executor, request)?;
    tracing::debug!(task = %task, pid = ?process.pid(), command = %command_line, "spawned process");

    let output = process.wait(on_output).await?;

    match output.status {
        ProcessExitStatus::ExitCode(0) => Ok(output),
        ProcessExitStatus::ExitCode(code) => Err(CoreError::new(
            CoreErrorKind::ProcessFailure,
            format!(
                "`{command_line}` exited with code {code}{}",
                failure_detail(&output)
            ),
        )
        .with_task(task)),
        ProcessExitStatus::Terminated => Err(CoreError::new(
            CoreErrorKind::ProcessFailure,
            format!("`{command_line}` was terminated by signal"),
        )
        .with_task(task)),
    }
}

pub async fn run_and_collect_stdout(
    executor: &dyn ProcessExecutor,
    request: ProcessSpawnRequest,
) -> ExecutionResult<String> {
    let task = request.task.clone();
    let output = run_command(executor, request, None).await?;
    String::from_utf8(output.stdout).map_err(|error| {
        CoreError::new(
            CoreErrorKind::ParseFailure,
            format!("process stdout is not valid UTF-8: {error}"),
        )
        .with_task(task)
    })
}

fn failure_detail(output: &ProcessOutput) -> String {
    let stderr = output.stderr_text();
    let text = if stderr.trim().is_empty() {
        output.stdout_text()
    } else {
        stderr
    };
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let skip = text.chars().count().saturating_sub(MAX_ERROR_OUTPUT_CHARS);
    let tail: String = text.chars().skip(skip).collect();
    format!(": {tail}")
}
