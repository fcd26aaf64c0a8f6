use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::execution::{
    ExecutionResult, OutputHandler, OutputStream, ProcessExecutor, ProcessExitStatus,
    ProcessOutput, ProcessSpawnRequest, ProcessWaitFuture, RunningProcess,
};
use crate::models::{CoreError, CoreErrorKind};

const READ_CHUNK_BYTES: usize = 8 * 1024;
const READ_DRAIN_WINDOW: Duration = Duration::from_millis(250);

pub struct TokioProcessExecutor;

impl ProcessExecutor for TokioProcessExecutor {
    fn spawn(&self, request: ProcessSpawnRequest) -> ExecutionResult<Box<dyn RunningProcess>> {
        let mut cmd = tokio::process::Command::new(&request.command.program);
        cmd.args(&request.command.args);

        for (key, value) in &request.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &request.command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|error| {
            process_failure(
                &request.task,
                format!(
                    "failed to spawn '{}': {error}",
                    request.command.program.display()
                ),
            )
        })?;

        let pid = child.id();
        let started_at = SystemTime::now();

        Ok(Box::new(TokioRunningProcess {
            child,
            pid,
            started_at,
            timeout: request.timeout,
            task: request.task,
        }))
    }
}

struct TokioRunningProcess {
    child: tokio::process::Child,
    pid: Option<u32>,
    started_at: SystemTime,
    timeout: Option<Duration>,
    task: String,
}

struct OutputCollector {
    handler: Option<OutputHandler>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputCollector {
    fn push(&mut self, stream: OutputStream, bytes: Vec<u8>) {
        if let Some(handler) = self.handler.as_mut() {
            handler(stream, &bytes);
        }
        match stream {
            OutputStream::Stdout => self.stdout.extend_from_slice(&bytes),
            OutputStream::Stderr => self.stderr.extend_from_slice(&bytes),
        }
    }
}

impl RunningProcess for TokioRunningProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait(self: Box<Self>, on_output: Option<OutputHandler>) -> ProcessWaitFuture {
        let TokioRunningProcess {
            mut child,
            pid,
            started_at,
            timeout,
            task,
        } = *self;

        Box::pin(async move {
            let (sender, mut receiver) = mpsc::unbounded_channel();
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_chunks(stdout, OutputStream::Stdout, sender.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_chunks(stderr, OutputStream::Stderr, sender.clone()));
            }
            drop(sender);

            let mut collector = OutputCollector {
                handler: on_output,
                stdout: Vec::new(),
                stderr: Vec::new(),
            };

            let deadline = timeout.map(|duration| Instant::now() + duration);
            let expiry = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(expiry);

            let mut streams_open = true;
            let status = loop {
                tokio::select! {
                    chunk = receiver.recv(), if streams_open => match chunk {
                        Some((stream, bytes)) => collector.push(stream, bytes),
                        None => streams_open = false,
                    },
                    result = child.wait() => {
                        break result.map_err(|error| {
                            process_failure(&task, format!("failed to wait for process: {error}"))
                        })?;
                    }
                    () = &mut expiry => {
                        kill_process_group(&mut child, pid);
                        let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                        let elapsed = timeout.unwrap_or_default();
                        return Err(CoreError::new(
                            CoreErrorKind::Timeout,
                            format!("process timed out after {}ms", elapsed.as_millis()),
                        )
                        .with_task(task));
                    }
                }
            };

            // Descendants may keep the pipes open after the child exits; only
            // drain for a short window instead of waiting for EOF.
            let drain_deadline = Instant::now() + READ_DRAIN_WINDOW;
            while streams_open {
                match tokio::time::timeout_at(drain_deadline, receiver.recv()).await {
                    Ok(Some((stream, bytes))) => collector.push(stream, bytes),
                    Ok(None) | Err(_) => streams_open = false,
                }
            }

            let status = match status.code() {
                Some(code) => ProcessExitStatus::ExitCode(code),
                None => ProcessExitStatus::Terminated,
            };

            Ok(ProcessOutput {
                status,
                stdout: collector.stdout,
                stderr: collector.stderr,
                started_at,
                finished_at: SystemTime::now(),
            })
        })
    }
}

async fn forward_chunks(
    mut reader: impl AsyncRead + Unpin,
    stream: OutputStream,
    sender: mpsc::UnboundedSender<(OutputStream, Vec<u8>)>,
) {
    let mut buffer = vec![0_u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                if sender.send((stream, buffer[..read].to_vec())).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut tokio::process::Child, pid: Option<u32>) {
    match pid {
        Some(pid) => {
            let pgid = -(pid as libc::pid_t);
            unsafe {
                libc::kill(pgid, libc::SIGKILL);
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut tokio::process::Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

fn process_failure(task: &str, message: String) -> CoreError {
    CoreError::new(CoreErrorKind::ProcessFailure, message).with_task(task)
}
