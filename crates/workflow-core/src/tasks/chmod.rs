use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::models::{CoreError, CoreErrorKind, TaskDescriptor, TaskState};
use crate::tasks::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};

pub const CHMOD_TASK: &str = "chmod";

/// Accepts `493` or `"755"` (octal).
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum FileMode {
    Bits(u32),
    Octal(String),
}

impl FileMode {
    pub fn bits(&self) -> TaskResult<u32> {
        match self {
            Self::Bits(bits) => Ok(*bits),
            Self::Octal(text) => u32::from_str_radix(text.trim_start_matches("0o"), 8).map_err(|_| {
                CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("'{text}' is not an octal file mode"),
                )
            }),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChmodEntry {
    pub source: String,
    pub mode: FileMode,
}

pub struct ChmodTask {
    descriptor: TaskDescriptor,
}

impl ChmodTask {
    pub fn new() -> Self {
        Self {
            descriptor: TaskDescriptor::new(CHMOD_TASK, "File permissions"),
        }
    }
}

impl Default for ChmodTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for ChmodTask {
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
            let Some(entries) = parse_config::<Vec<ChmodEntry>>(CHMOD_TASK, config)? else {
                unit.muted("no permissions configured");
                return Ok(TaskState::Skip);
            };

            let mut failed = false;
            for entry in &entries {
                let path = resolve_in_workspace(workspace, &entry.source);
                let outcome = entry
                    .mode
                    .bits()
                    .and_then(|mode| apply_mode(&path, mode));
                match outcome {
                    Ok(true) => unit.print(format!("{} mode set", entry.source)),
                    Ok(false) => unit.muted(format!("{} already has the requested mode", entry.source)),
                    Err(error) => {
                        unit.error(format!("{} {}", entry.source, error.message));
                        failed = true;
                    }
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

/// Sets `mode` unless every requested bit is already present. Returns whether
/// the permissions changed.
#[cfg(unix)]
pub fn apply_mode(path: &Path, mode: u32) -> TaskResult<bool> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|error| chmod_error(path, error))?;
    let current = metadata.permissions().mode();
    if current & mode == mode {
        return Ok(false);
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|error| chmod_error(path, error))?;
    Ok(true)
}

#[cfg(not(unix))]
pub fn apply_mode(path: &Path, _mode: u32) -> TaskResult<bool> {
    Err(CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("cannot set unix mode on '{}' on this platform", path.display()),
    ))
}

#[cfg_attr(not(unix), allow(dead_code))]
fn chmod_error(path: &Path, error: std::io::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("failed to change mode of '{}': {error}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::FileMode;

    #[test]
    fn modes_parse_from_numbers_and_octal_strings() {
        assert_eq!(FileMode::Bits(0o644).bits().unwrap(), 0o644);
        assert_eq!(FileMode::Octal("755".to_string()).bits().unwrap(), 0o755);
        assert_eq!(FileMode::Octal("0o700".to_string()).bits().unwrap(), 0o700);
        assert!(FileMode::Octal("9x".to_string()).bits().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn mode_is_only_applied_when_bits_are_missing() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(super::apply_mode(&script, 0o755).unwrap());
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(!super::apply_mode(&script, 0o755).unwrap());
    }
}
