use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessSpawnRequest, run_and_collect_stdout, run_command,
};
use crate::models::{TaskDescriptor, TaskState, available_parallelism};
use crate::tasks::tracked::{TrackedFiles, path_key};
use crate::tasks::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};

pub const LESS_TASK: &str = "less";

const LESS_EXTENSION: &str = ".less";

#[derive(Clone, Debug, Deserialize)]
pub struct LessEntry {
    pub source: String,
    pub dist: String,
    #[serde(default)]
    pub compress: bool,
}

/// Compiles Less stylesheets, recompiling only when the source or one of its
/// imports changed.
pub struct LessTask {
    descriptor: TaskDescriptor,
    executor: Arc<dyn ProcessExecutor>,
}

impl LessTask {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            descriptor: TaskDescriptor::new(LESS_TASK, "Less compile")
                .max_concurrent(available_parallelism()),
            executor,
        }
    }

    async fn compile_entry(
        &self,
        unit: &mut TaskUnit,
        workspace: &Path,
        entry: &LessEntry,
    ) -> TaskResult<()> {
        let source = resolve_in_workspace(workspace, &entry.source);
        let dist = resolve_in_workspace(workspace, &entry.dist);
        let key = path_key(&source);
        let cached = unit.get_cache(&key)?;

        let listing = run_and_collect_stdout(
            self.executor.as_ref(),
            less_depends_request(workspace, &source, &dist),
        )
        .await?;
        let mut files = vec![source.clone()];
        files.extend(
            parse_dependencies(&listing)
                .into_iter()
                .map(|dependency| resolve_in_workspace(workspace, dependency))
                .filter(|path| path.exists() && *path != source),
        );
        unit.highlight(format!("{} Compile files: {}", entry.source, files.len()));

        let tracked = TrackedFiles::collect(files)?;
        if dist.exists() && !tracked.changed_since(&cached) {
            unit.muted(format!("{} No changes, skipping compile", entry.source));
            return Ok(());
        }

        run_command(
            self.executor.as_ref(),
            less_compile_request(workspace, &source, &dist, entry.compress),
            None,
        )
        .await?;
        unit.set_cache(&key, tracked.to_value())?;
        unit.print(format!("{} => {}", entry.source, entry.dist));
        Ok(())
    }
}

impl Task for LessTask {
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
            let Some(entries) = parse_config::<Vec<LessEntry>>(LESS_TASK, config)? else {
                unit.muted("no stylesheets configured");
                return Ok(TaskState::Skip);
            };

            let mut failed = false;
            for entry in &entries {
                if let Err(error) = self.compile_entry(unit, workspace, entry).await {
                    unit.error(format!("{} {}", entry.source, error.message));
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

pub fn less_depends_request(workspace: &Path, source: &Path, dist: &Path) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        LESS_TASK,
        CommandSpec::new("npx")
            .arg("lessc")
            .arg("--depends")
            .arg(source.to_string_lossy())
            .arg(dist.to_string_lossy())
            .working_dir(workspace),
    )
}

pub fn less_compile_request(
    workspace: &Path,
    source: &Path,
    dist: &Path,
    compress: bool,
) -> ProcessSpawnRequest {
    let mut command = CommandSpec::new("npx").arg("lessc");
    if compress {
        command = command.arg("--compress");
    }
    ProcessSpawnRequest::new(
        LESS_TASK,
        command
            .arg(source.to_string_lossy())
            .arg(dist.to_string_lossy())
            .working_dir(workspace),
    )
}

/// Parses `lessc --depends` output of the form `target: a.less b/c.less`.
/// Paths may contain spaces, so entries are split on the extension.
fn parse_dependencies(listing: &str) -> Vec<PathBuf> {
    let mut dependencies = Vec::new();
    for line in listing.lines() {
        let list = match line.find(": ") {
            Some(index) => &line[index + 2..],
            None => line,
        };
        let list = list.trim();
        if list.is_empty() {
            continue;
        }

        let pieces: Vec<&str> = list.split(".less ").collect();
        let last = pieces.len() - 1;
        for (index, piece) in pieces.into_iter().enumerate() {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            if index == last {
                dependencies.push(PathBuf::from(piece));
            } else {
                dependencies.push(PathBuf::from(format!("{piece}{LESS_EXTENSION}")));
            }
        }
    }
    dependencies
}
