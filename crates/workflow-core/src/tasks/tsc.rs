use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessSpawnRequest, run_and_collect_stdout, run_command,
};
use crate::models::{TaskDescriptor, TaskState, available_parallelism};
use crate::tasks::tracked::{TrackedFiles, path_key};
use crate::tasks::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};

pub const TSC_TASK: &str = "tsc";

/// Compiles TypeScript projects. Config: a list of project directories.
pub struct TscTask {
    descriptor: TaskDescriptor,
    executor: Arc<dyn ProcessExecutor>,
}

impl TscTask {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            descriptor: TaskDescriptor::new(TSC_TASK, "TypeScript compile")
                .max_concurrent(available_parallelism()),
            executor,
        }
    }

    async fn compile_project(&self, unit: &mut TaskUnit, label: &str, project: &Path) -> TaskResult<()> {
        let key = path_key(project);
        let cached = unit.get_cache(&key)?;

        let listing = run_and_collect_stdout(self.executor.as_ref(), tsc_list_files_request(project)).await?;
        let files = parse_listed_files(&listing);
        unit.highlight(format!("{label} Compile files: {}", files.len()));

        let tracked = TrackedFiles::collect(files)?;
        if !tracked.changed_since(&cached) {
            unit.muted(format!("{label} No changes, skipping compile"));
            return Ok(());
        }

        run_command(self.executor.as_ref(), tsc_compile_request(project), None).await?;
        unit.set_cache(&key, tracked.to_value())?;
        unit.print(format!("{label} Compiled"));
        Ok(())
    }
}

impl Task for TscTask {
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
            let Some(projects) = parse_config::<Vec<String>>(TSC_TASK, config)? else {
                unit.muted("no projects configured");
                return Ok(TaskState::Skip);
            };

            let mut failed = false;
            for project in &projects {
                let path = resolve_in_workspace(workspace, project);
                if let Err(error) = self.compile_project(unit, project, &path).await {
                    unit.error(format!("{project} {}", error.message));
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

pub fn tsc_list_files_request(project: &Path) -> ProcessSpawnRequest {
    tsc_request(project, &["tsc", "--listFilesOnly"])
}

pub fn tsc_compile_request(project: &Path) -> ProcessSpawnRequest {
    tsc_request(project, &["tsc"])
}

fn tsc_request(project: &Path, args: &[&str]) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        TSC_TASK,
        CommandSpec::new("npx")
            .args(args.iter().copied())
            .working_dir(project),
    )
}

/// One path per line; entries that do not exist on disk are dropped.
fn parse_listed_files(listing: &str) -> Vec<PathBuf> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .filter(|path| path.exists())
        .collect()
}
