use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::execution::ProcessExecutor;
use crate::models::{CoreError, CoreErrorKind, TaskDescriptor, TaskState};
use crate::tasks::repo_process::ProcessGitSource;
use crate::tasks::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};

pub const REPO_TASK: &str = "repo";

const BACKUP_PREFIX: &str = "_";

pub type GitFuture<'a, T> = Pin<Box<dyn Future<Output = TaskResult<T>> + Send + 'a>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Branch,
    Tag,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSpec {
    pub name: String,
    pub url: String,
    pub local: String,
    #[serde(default)]
    pub target_type: Option<TargetType>,
    #[serde(default)]
    pub target_value: String,
}

impl RemoteSpec {
    /// Revision that names the commit the checkout should end up on, or
    /// `None` when neither a branch nor a tag is configured.
    pub fn target_revision(&self) -> Option<String> {
        if self.target_value.is_empty() {
            return None;
        }
        match self.target_type? {
            TargetType::Branch => Some(format!("{}/{}^{{commit}}", self.name, self.target_value)),
            TargetType::Tag => Some(format!("refs/tags/{}^{{commit}}", self.target_value)),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RepoEntry {
    pub repo: RemoteSpec,
    pub path: String,
    #[serde(default)]
    pub hard: bool,
    #[serde(default)]
    pub skip: bool,
}

pub trait GitSource: Send + Sync {
    fn clone_repository<'a>(&'a self, url: &'a str, path: &'a Path) -> GitFuture<'a, ()>;
    fn set_remote<'a>(&'a self, path: &'a Path, name: &'a str, url: &'a str) -> GitFuture<'a, ()>;
    fn fetch<'a>(&'a self, path: &'a Path, remote: &'a str) -> GitFuture<'a, ()>;
    fn rev_parse<'a>(&'a self, path: &'a Path, revision: &'a str) -> GitFuture<'a, String>;
    fn has_uncommitted_changes<'a>(&'a self, path: &'a Path) -> GitFuture<'a, bool>;
    fn stash<'a>(&'a self, path: &'a Path) -> GitFuture<'a, ()>;
    fn current_branch<'a>(&'a self, path: &'a Path) -> GitFuture<'a, String>;
    /// Switches to `branch`, creating it first when it does not exist.
    fn checkout_branch<'a>(&'a self, path: &'a Path, branch: &'a str) -> GitFuture<'a, ()>;
    fn reset_hard<'a>(&'a self, path: &'a Path, commit: &'a str) -> GitFuture<'a, ()>;
}

/// Keeps checkouts pinned to a remote branch or tag. Dirty trees and
/// checkouts on another branch are left alone unless `hard` is set.
pub struct RepoTask<S: GitSource> {
    descriptor: TaskDescriptor,
    source: S,
}

impl RepoTask<ProcessGitSource> {
    pub fn with_executor(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self::new(ProcessGitSource::new(executor))
    }
}

impl<S: GitSource> RepoTask<S> {
    pub fn new(source: S) -> Self {
        Self {
            descriptor: TaskDescriptor::new(REPO_TASK, "Sync repositories"),
            source,
        }
    }

    async fn sync_entry(
        &self,
        unit: &mut TaskUnit,
        workspace: &Path,
        entry: &RepoEntry,
    ) -> TaskResult<TaskState> {
        let label = entry.path.as_str();
        if entry.skip {
            unit.muted(format!("{label} skipped by configuration"));
            return Ok(TaskState::Skip);
        }

        let remote = &entry.repo;
        let Some(revision) = remote.target_revision() else {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "no branch or tag configured",
            ));
        };

        let path = resolve_in_workspace(workspace, &entry.path);
        self.ensure_checkout(unit, label, &path, &remote.url).await?;

        self.source.set_remote(&path, &remote.name, &remote.url).await?;
        self.source.fetch(&path, &remote.name).await?;

        let target = self.source.rev_parse(&path, &revision).await?;
        let head = self.source.rev_parse(&path, "HEAD").await?;
        if target == head {
            unit.muted(format!("{label} already at {}", short_commit(&target)));
            return Ok(TaskState::Skip);
        }

        if self.source.has_uncommitted_changes(&path).await? {
            if !entry.hard {
                unit.warn(format!("{label} has uncommitted changes, not updating"));
                return Ok(TaskState::Skip);
            }
            unit.warn(format!("{label} stashing uncommitted changes"));
            self.source.stash(&path).await?;
        }

        let branch = self.source.current_branch(&path).await?;
        if branch != remote.local {
            if !entry.hard {
                unit.warn(format!(
                    "{label} is on branch '{branch}' instead of '{}', not updating",
                    remote.local
                ));
                return Ok(TaskState::Skip);
            }
            self.source.checkout_branch(&path, &remote.local).await?;
        }

        self.source.reset_hard(&path, &target).await?;
        unit.print(format!(
            "{label} {} -> {} ({})",
            short_commit(&head),
            short_commit(&target),
            remote.target_value
        ));
        Ok(TaskState::Success)
    }

    /// Clones into `path` when it is not a repository, moving any existing
    /// non-repository directory aside first.
    async fn ensure_checkout(
        &self,
        unit: &mut TaskUnit,
        label: &str,
        path: &Path,
        url: &str,
    ) -> TaskResult<()> {
        if path.join(".git").exists() {
            return Ok(());
        }

        if path.exists() {
            let backup = backup_path(path)?;
            unit.warn(format!(
                "{label} is not a repository, moving it to '{}'",
                backup.display()
            ));
            if backup.exists() {
                std::fs::remove_dir_all(&backup).map_err(|error| storage_error(&backup, error))?;
            }
            std::fs::rename(path, &backup).map_err(|error| storage_error(path, error))?;
        } else if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| storage_error(parent, error))?;
        }

        unit.print(format!("{label} cloning {url}"));
        self.source.clone_repository(url, path).await
    }
}

impl<S: GitSource> Task for RepoTask<S> {
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
            let Some(entries) = parse_config::<Vec<Value>>(REPO_TASK, config)? else {
                unit.muted("no repositories configured");
                return Ok(TaskState::Skip);
            };

            let mut states = Vec::with_capacity(entries.len());
            for (index, raw) in entries.into_iter().enumerate() {
                let label = entry_label(&raw, index);
                let result = match parse_entry(raw) {
                    Ok(entry) => self.sync_entry(unit, workspace, &entry).await,
                    Err(error) => Err(error),
                };
                let state = match result {
                    Ok(state) => state,
                    Err(error) => {
                        unit.error(format!("{label} {}", error.message));
                        TaskState::Error
                    }
                };
                states.push(state);
            }
            Ok(combine_states(&states))
        })
    }
}

/// Any error wins, then any success; a unit where every entry skipped is a
/// skip. An empty entry list did nothing wrong and counts as success.
pub fn combine_states(states: &[TaskState]) -> TaskState {
    if states.is_empty() {
        TaskState::Success
    } else if states.contains(&TaskState::Error) {
        TaskState::Error
    } else if states.contains(&TaskState::Success) {
        TaskState::Success
    } else {
        TaskState::Skip
    }
}

fn parse_entry(raw: Value) -> TaskResult<RepoEntry> {
    serde_json::from_value(raw).map_err(|error| {
        CoreError::new(
            CoreErrorKind::ParseFailure,
            format!("invalid repository entry: {error}"),
        )
        .with_task(REPO_TASK)
    })
}

fn entry_label(raw: &Value, index: usize) -> String {
    raw.get("path")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("entry {index}"))
}

fn backup_path(path: &Path) -> TaskResult<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("repository path '{}' has no directory name", path.display()),
        )
    })?;
    let mut backup = std::ffi::OsString::from(BACKUP_PREFIX);
    backup.push(name);
    Ok(path.with_file_name(backup))
}

fn short_commit(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

fn storage_error(path: &Path, error: std::io::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("'{}': {error}", path.display()),
    )
}
