pub mod chmod;
pub mod download;
pub mod download_http;
pub mod file;
pub mod less;
pub mod npm;
pub mod remove;
pub mod repo;
pub mod repo_process;
pub mod tracked;
pub mod tsc;
pub mod unit;

pub use chmod::ChmodTask;
pub use download::{DownloadTask, Fetcher};
pub use download_http::HttpFetcher;
pub use file::{FileCopier, FileTask, StdFileCopier};
pub use less::LessTask;
pub use npm::NpmTask;
pub use remove::RemoveTask;
pub use repo::{GitSource, RepoTask};
pub use repo_process::ProcessGitSource;
pub use tsc::TscTask;
pub use unit::{Task, TaskFuture, TaskResult, TaskUnit, parse_config, resolve_in_workspace};
