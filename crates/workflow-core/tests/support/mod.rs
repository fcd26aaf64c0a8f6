#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use workflow_core::execution::{
    ExecutionResult, OutputHandler, OutputStream, ProcessExecutor, ProcessExitStatus,
    ProcessOutput, ProcessSpawnRequest, ProcessWaitFuture, RunningProcess,
};
use workflow_core::persistence::{CacheStore, JsonCacheStore, ScopedCache};
use workflow_core::tasks::TaskUnit;

#[derive(Clone)]
struct Reply {
    prefix: String,
    code: i32,
    stdout: String,
    stderr: String,
}

/// Answers commands by matching the start of their rendered command line.
/// Unmatched commands succeed with no output.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    replies: Arc<Mutex<Vec<Reply>>>,
    requests: Arc<Mutex<Vec<ProcessSpawnRequest>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, code: i32, stdout: &str) {
        self.respond_with_stderr(prefix, code, stdout, "");
    }

    pub fn respond_with_stderr(&self, prefix: &str, code: i32, stdout: &str, stderr: &str) {
        self.replies.lock().unwrap().push(Reply {
            prefix: prefix.to_string(),
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        });
    }

    pub fn requests(&self) -> Vec<ProcessSpawnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| request.command.display_line())
            .collect()
    }

    pub fn count_exact(&self, line: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|candidate| candidate.as_str() == line)
            .count()
    }
}

impl ProcessExecutor for ScriptedExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let line = request.command.display_line();
        let reply = self
            .replies
            .lock()
            .unwrap()
            .iter()
            .find(|reply| line.starts_with(&reply.prefix))
            .cloned();
        self.requests.lock().unwrap().push(request);

        let reply = reply.unwrap_or(Reply {
            prefix: String::new(),
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        });
        Ok(Box::new(ScriptedProcess { reply }))
    }
}

struct ScriptedProcess {
    reply: Reply,
}

impl RunningProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn wait(self: Box<Self>, on_output: Option<OutputHandler>) -> ProcessWaitFuture {
        let reply = self.reply;
        Box::pin(async move {
            if let Some(mut handler) = on_output {
                if !reply.stdout.is_empty() {
                    handler(OutputStream::Stdout, reply.stdout.as_bytes());
                }
                if !reply.stderr.is_empty() {
                    handler(OutputStream::Stderr, reply.stderr.as_bytes());
                }
            }
            let now = SystemTime::now();
            Ok(ProcessOutput {
                status: ProcessExitStatus::ExitCode(reply.code),
                stdout: reply.stdout.into_bytes(),
                stderr: reply.stderr.into_bytes(),
                started_at: now,
                finished_at: now + Duration::from_millis(1),
            })
        })
    }
}

pub fn memory_store(dir: &Path) -> Arc<JsonCacheStore> {
    Arc::new(JsonCacheStore::empty(dir.join("cache.json")))
}

pub fn unit_for(task: &str, workspace: &Path, cache_dir: &Path, store: Arc<dyn CacheStore>) -> TaskUnit {
    TaskUnit::new(workspace, cache_dir, ScopedCache::new(task, store))
}

pub fn log_text(unit: &TaskUnit) -> String {
    unit.logs()
        .iter()
        .map(|line| line.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
