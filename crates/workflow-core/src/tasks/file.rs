use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::models::{CoreError, CoreErrorKind, TaskDescriptor, TaskState};
use crate::tasks::tracked::{TrackedFiles, path_key};
use crate::tasks::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};

pub const FILE_TASK: &str = "file";

#[derive(Clone, Debug, Deserialize)]
pub struct FileEntry {
    pub source: String,
    pub dist: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

pub trait FileCopier: Send + Sync {
    fn copy(&self, from: &Path, to: &Path) -> std::io::Result<()>;
}

pub struct StdFileCopier;

impl FileCopier for StdFileCopier {
    fn copy(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to).map(|_| ())
    }
}

/// Mirrors a file or directory tree into `dist`, copying only files that are
/// new, modified, or missing at the destination.
pub struct FileTask {
    descriptor: TaskDescriptor,
    copier: Arc<dyn FileCopier>,
}

impl FileTask {
    pub fn new() -> Self {
        Self::with_copier(Arc::new(StdFileCopier))
    }

    pub fn with_copier(copier: Arc<dyn FileCopier>) -> Self {
        Self {
            descriptor: TaskDescriptor::new(FILE_TASK, "Copy files"),
            copier,
        }
    }

    fn copy_entry(&self, unit: &mut TaskUnit, workspace: &Path, entry: &FileEntry) -> TaskResult<()> {
        let source = resolve_in_workspace(workspace, &entry.source);
        let dist = resolve_in_workspace(workspace, &entry.dist);
        let key = path_key(&source);
        let cached = unit.get_cache(&key)?;

        let filter = EntryFilter::new(&entry.include, &entry.exclude)?;
        let files = collect_files(&source, &filter)?;
        unit.highlight(format!(
            "{} => {} Copy files: {}",
            entry.source,
            entry.dist,
            files.len()
        ));

        let tracked = TrackedFiles::collect(files.iter().map(|(file, _)| file.clone()))?;
        let mut copied = 0_usize;
        for (file, relative) in &files {
            let target = if relative.as_os_str().is_empty() {
                dist.clone()
            } else {
                dist.join(relative)
            };
            if target.exists() && !tracked.is_stale(file, &cached) {
                continue;
            }
            self.copier.copy(file, &target).map_err(|error| {
                CoreError::new(
                    CoreErrorKind::StorageFailure,
                    format!(
                        "failed to copy '{}' to '{}': {error}",
                        file.display(),
                        target.display()
                    ),
                )
            })?;
            copied += 1;
        }

        if copied == 0 && !tracked.changed_since(&cached) {
            unit.muted(format!("{} No changes, skipping copy", entry.source));
        } else {
            unit.print(format!("{} Copied: {copied}", entry.source));
        }
        unit.set_cache(&key, tracked.to_value())?;
        Ok(())
    }
}

impl Default for FileTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for FileTask {
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
            let Some(entries) = parse_config::<Vec<FileEntry>>(FILE_TASK, config)? else {
                unit.muted("no copy entries configured");
                return Ok(TaskState::Skip);
            };

            let mut failed = false;
            for entry in &entries {
                if let Err(error) = self.copy_entry(unit, workspace, entry) {
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

/// Include/exclude glob patterns matched against paths relative to the
/// entry's source.
struct EntryFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl EntryFilter {
    fn new(include: &[String], exclude: &[String]) -> TaskResult<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    fn accepts(&self, relative: &Path) -> bool {
        let included = self
            .include
            .as_ref()
            .is_none_or(|globs| globs.is_match(relative));
        let excluded = self
            .exclude
            .as_ref()
            .is_some_and(|globs| globs.is_match(relative));
        included && !excluded
    }
}

fn build_globset(patterns: &[String]) -> TaskResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid glob pattern '{pattern}': {error}"),
            )
        })?;
        builder.add(glob);
    }
    builder.build().map(Some).map_err(|error| {
        CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("failed to build glob set: {error}"),
        )
    })
}

/// Files under `source` with their path relative to it. A plain file source
/// yields itself with an empty relative path.
fn collect_files(source: &Path, filter: &EntryFilter) -> TaskResult<Vec<(PathBuf, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|error| {
            CoreError::new(
                CoreErrorKind::StorageFailure,
                format!("failed to read '{}': {error}", source.display()),
            )
        })?;
        if entry.file_type().is_dir() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let matched = if relative.as_os_str().is_empty() {
            entry.path().file_name().map(PathBuf::from).unwrap_or_default()
        } else {
            relative.clone()
        };
        if filter.accepts(&matched) {
            files.push((entry.into_path(), relative));
        }
    }
    Ok(files)
}
