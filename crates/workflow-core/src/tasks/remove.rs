use std::path::Path;

use serde_json::Value;

use crate::models::{CoreError, CoreErrorKind, TaskDescriptor, TaskState};
use crate::tasks::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};

pub const REMOVE_TASK: &str = "remove";

/// Deletes files or directory trees. Paths that do not exist are fine.
pub struct RemoveTask {
    descriptor: TaskDescriptor,
}

impl RemoveTask {
    pub fn new() -> Self {
        Self {
            descriptor: TaskDescriptor::new(REMOVE_TASK, "Remove files"),
        }
    }
}

impl Default for RemoveTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for RemoveTask {
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
            let Some(paths) = parse_config::<Vec<String>>(REMOVE_TASK, config)? else {
                unit.muted("no paths configured");
                return Ok(TaskState::Skip);
            };

            let mut failed = false;
            for path in &paths {
                unit.print(format!("Remove files in {path}"));
                if let Err(error) = remove_recursive(&resolve_in_workspace(workspace, path)) {
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

pub fn remove_recursive(path: &Path) -> TaskResult<()> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(remove_error(path, error)),
    };

    let result = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|error| remove_error(path, error))
}

fn remove_error(path: &Path, error: std::io::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("failed to remove '{}': {error}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::remove_recursive;

    #[test]
    fn removes_trees_and_ignores_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("build");
        std::fs::create_dir_all(tree.join("nested")).unwrap();
        std::fs::write(tree.join("nested/out.js"), "x").unwrap();
        let file = dir.path().join("stale.txt");
        std::fs::write(&file, "x").unwrap();

        remove_recursive(&tree).unwrap();
        remove_recursive(&file).unwrap();
        remove_recursive(&dir.path().join("never-existed")).unwrap();

        assert!(!tree.exists());
        assert!(!file.exists());
    }
}
