use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::execution::{CommandSpec, ProcessExecutor, ProcessSpawnRequest, run_command};
use crate::models::{CoreError, CoreErrorKind, TaskDescriptor, TaskState};
use crate::tasks::download_http::HttpFetcher;
use crate::tasks::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};

pub const DOWNLOAD_TASK: &str = "download";

const ARCHIVE_METADATA_DIR: &str = "__MACOSX";

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = TaskResult<Vec<u8>>> + Send + 'a>>;

pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;
}

#[derive(Clone, Debug, Deserialize)]
pub struct DownloadEntry {
    pub url: String,
    pub dist: String,
    /// Shell command run in the workspace after the artifact is installed.
    #[serde(default)]
    pub then: Option<String>,
}

/// Fetches artifacts into the shared download directory once, then unpacks
/// `.zip` archives (or copies anything else) into each workspace.
pub struct DownloadTask<F: Fetcher> {
    descriptor: TaskDescriptor,
    fetcher: F,
    executor: Arc<dyn ProcessExecutor>,
}

impl DownloadTask<HttpFetcher> {
    pub fn with_executor(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self::new(HttpFetcher::new(), executor)
    }
}

impl<F: Fetcher> DownloadTask<F> {
    pub fn new(fetcher: F, executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            descriptor: TaskDescriptor::new(DOWNLOAD_TASK, "Download artifacts"),
            fetcher,
            executor,
        }
    }

    async fn download_entry(
        &self,
        unit: &mut TaskUnit,
        workspace: &Path,
        entry: &DownloadEntry,
    ) -> TaskResult<()> {
        let cache_dir = unit.cache_dir().to_path_buf();
        let artifact = cache_dir.join(artifact_name(&entry.url)?);
        let dist = resolve_in_workspace(workspace, &entry.dist);

        if !artifact.exists() {
            unit.print(format!("Downloading {}", entry.url));
            let bytes = self.fetcher.fetch(&entry.url).await?;
            std::fs::create_dir_all(&cache_dir).map_err(|error| io_error(&cache_dir, error))?;
            std::fs::write(&artifact, bytes).map_err(|error| io_error(&artifact, error))?;
            if dist.exists() {
                remove_path(&dist)?;
            }
        } else {
            unit.muted(format!("Using cached {}", artifact.display()));
        }

        if dist.exists() {
            unit.muted(format!("{} is up to date", entry.dist));
        } else {
            let source = artifact.clone();
            let target = dist.clone();
            let unpacked = tokio::task::spawn_blocking(move || install_artifact(&source, &target))
                .await
                .map_err(|error| {
                    CoreError::new(
                        CoreErrorKind::Internal,
                        format!("artifact install worker failed: {error}"),
                    )
                })??;
            unit.print(if unpacked {
                format!("Extracted to {}", entry.dist)
            } else {
                format!("Copied to {}", entry.dist)
            });

            if let Some(command) = entry.then.as_deref() {
                unit.muted(format!("Running {command}"));
                run_command(self.executor.as_ref(), shell_request(workspace, command), None)
                    .await?;
            }
        }
        Ok(())
    }
}

impl<F: Fetcher> Task for DownloadTask<F> {
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
            let Some(entries) = parse_config::<Vec<DownloadEntry>>(DOWNLOAD_TASK, config)? else {
                unit.muted("no downloads configured");
                return Ok(TaskState::Skip);
            };

            if unit.cache_dir().as_os_str().is_empty() {
                unit.error("download cache directory is not set up correctly");
                return Ok(TaskState::Error);
            }

            let mut failed = false;
            for entry in &entries {
                if let Err(error) = self.download_entry(unit, workspace, entry).await {
                    unit.error(format!("{} {}", entry.url, error.message));
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

/// Last path segment of the URL, without query or fragment.
pub fn artifact_name(url: &str) -> TaskResult<String> {
    let without_suffix = url.split(['?', '#']).next().unwrap_or(url);
    without_suffix
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && *name != ".." && *name != ".")
        .map(str::to_string)
        .ok_or_else(|| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("cannot derive a file name from '{url}'"),
            )
        })
}

/// Returns whether the artifact was unpacked as an archive. A failed install
/// leaves no `dist` behind.
fn install_artifact(artifact: &Path, dist: &Path) -> TaskResult<bool> {
    place_artifact(artifact, dist).inspect_err(|_| {
        if dist.exists() && remove_path(dist).is_err() {
            tracing::warn!(dist = %dist.display(), "failed to remove partial install");
        }
    })
}

fn place_artifact(artifact: &Path, dist: &Path) -> TaskResult<bool> {
    let is_zip = artifact
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("zip"));

    if is_zip {
        extract_zip(artifact, dist)?;
    } else {
        if let Some(parent) = dist.parent() {
            std::fs::create_dir_all(parent).map_err(|error| io_error(parent, error))?;
        }
        std::fs::copy(artifact, dist).map_err(|error| io_error(dist, error))?;
    }
    Ok(is_zip)
}

fn extract_zip(archive_path: &Path, dist: &Path) -> TaskResult<()> {
    let file = std::fs::File::open(archive_path).map_err(|error| io_error(archive_path, error))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|error| {
        CoreError::new(
            CoreErrorKind::ParseFailure,
            format!("failed to open ZIP archive: {error}"),
        )
    })?;
    archive.extract(dist).map_err(|error| {
        CoreError::new(
            CoreErrorKind::StorageFailure,
            format!("failed to extract ZIP archive: {error}"),
        )
    })?;
    remove_archive_metadata(dist)
}

fn remove_archive_metadata(dist: &Path) -> TaskResult<()> {
    let metadata_dirs: Vec<PathBuf> = WalkDir::new(dist)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir() && entry.file_name() == ARCHIVE_METADATA_DIR)
        .map(walkdir::DirEntry::into_path)
        .collect();

    for dir in metadata_dirs {
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(io_error(&dir, error)),
        }
    }
    Ok(())
}

fn remove_path(path: &Path) -> TaskResult<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(|error| io_error(path, error))
}

fn shell_request(workspace: &Path, command: &str) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        DOWNLOAD_TASK,
        CommandSpec::new("sh")
            .arg("-c")
            .arg(command)
            .working_dir(workspace),
    )
}

fn io_error(path: &Path, error: std::io::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("'{}': {error}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{artifact_name, extract_zip, install_artifact};

    #[test]
    fn artifact_name_strips_query_and_fragment() {
        assert_eq!(
            artifact_name("https://example.invalid/pkg/tool-1.0.zip?token=a#x").unwrap(),
            "tool-1.0.zip"
        );
        assert!(artifact_name("https://example.invalid/pkg/").is_err());
    }

    #[test]
    fn zip_extraction_drops_archive_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("bundle.zip");
        {
            let file = std::fs::File::create(&archive_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("bin/tool", options).unwrap();
            writer.write_all(b"#!/bin/sh\n").unwrap();
            writer.start_file("__MACOSX/bin/._tool", options).unwrap();
            writer.write_all(b"junk").unwrap();
            writer.finish().unwrap();
        }

        let dist = dir.path().join("out");
        extract_zip(&archive_path, &dist).unwrap();

        assert!(dist.join("bin/tool").is_file());
        assert!(!dist.join("__MACOSX").exists());
    }

    #[test]
    fn failed_extraction_removes_the_partial_install() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("broken.zip");
        {
            let file = std::fs::File::create(&archive_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("lib/core", options).unwrap();
            writer.write_all(b"first").unwrap();
            writer.start_file("lib/core/nested.txt", options).unwrap();
            writer.write_all(b"cannot live under a file").unwrap();
            writer.finish().unwrap();
        }

        let dist = dir.path().join("out");
        assert!(install_artifact(&archive_path, &dist).is_err());
        assert!(!dist.exists());
    }
}
