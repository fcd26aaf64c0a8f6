use std::path::Path;
use std::sync::Arc;

use crate::execution::{
    CommandSpec, ProcessExecutor, ProcessSpawnRequest, run_and_collect_stdout, run_command,
};
use crate::models::{CoreError, CoreErrorKind};
use crate::tasks::TaskResult;
use crate::tasks::repo::{GitFuture, GitSource, REPO_TASK};

pub struct ProcessGitSource {
    executor: Arc<dyn ProcessExecutor>,
}

impl ProcessGitSource {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self { executor }
    }

    async fn git(&self, path: &Path, args: &[&str]) -> TaskResult<String> {
        let output = run_and_collect_stdout(self.executor.as_ref(), git_request(path, args)).await?;
        Ok(output.trim().to_string())
    }

    async fn git_succeeds(&self, path: &Path, args: &[&str]) -> bool {
        run_command(self.executor.as_ref(), git_request(path, args), None)
            .await
            .is_ok()
    }
}

impl GitSource for ProcessGitSource {
    fn clone_repository<'a>(&'a self, url: &'a str, path: &'a Path) -> GitFuture<'a, ()> {
        Box::pin(async move {
            let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("cannot clone into '{}'", path.display()),
                ));
            };
            let name = name.to_string_lossy();
            self.git(parent, &["clone", url, &*name]).await?;
            Ok(())
        })
    }

    fn set_remote<'a>(&'a self, path: &'a Path, name: &'a str, url: &'a str) -> GitFuture<'a, ()> {
        Box::pin(async move {
            if !self.git_succeeds(path, &["remote", "add", name, url]).await {
                self.git(path, &["remote", "set-url", name, url]).await?;
            }
            Ok(())
        })
    }

    fn fetch<'a>(&'a self, path: &'a Path, remote: &'a str) -> GitFuture<'a, ()> {
        Box::pin(async move {
            self.git(path, &["fetch", remote, "--tags"]).await?;
            Ok(())
        })
    }

    fn rev_parse<'a>(&'a self, path: &'a Path, revision: &'a str) -> GitFuture<'a, String> {
        Box::pin(async move { self.git(path, &["rev-parse", revision]).await })
    }

    fn has_uncommitted_changes<'a>(&'a self, path: &'a Path) -> GitFuture<'a, bool> {
        Box::pin(async move {
            let status = self
                .git(path, &["status", "--porcelain", "--untracked-files=no"])
                .await?;
            Ok(!status.is_empty())
        })
    }

    fn stash<'a>(&'a self, path: &'a Path) -> GitFuture<'a, ()> {
        Box::pin(async move {
            self.git(path, &["stash"]).await?;
            Ok(())
        })
    }

    fn current_branch<'a>(&'a self, path: &'a Path) -> GitFuture<'a, String> {
        Box::pin(async move { self.git(path, &["branch", "--show-current"]).await })
    }

    fn checkout_branch<'a>(&'a self, path: &'a Path, branch: &'a str) -> GitFuture<'a, ()> {
        Box::pin(async move {
            // Fails when the branch already exists; the plain checkout below covers that.
            let _ = self.git_succeeds(path, &["checkout", "-b", branch]).await;
            self.git(path, &["checkout", branch]).await?;
            Ok(())
        })
    }

    fn reset_hard<'a>(&'a self, path: &'a Path, commit: &'a str) -> GitFuture<'a, ()> {
        Box::pin(async move {
            self.git(path, &["reset", "--hard", commit]).await?;
            Ok(())
        })
    }
}

pub fn git_request(path: &Path, args: &[&str]) -> ProcessSpawnRequest {
    ProcessSpawnRequest::new(
        REPO_TASK,
        CommandSpec::new("git")
            .args(args.iter().copied())
            .env("GIT_TERMINAL_PROMPT", "0")
            .working_dir(path),
    )
}
