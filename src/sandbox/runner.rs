//! Interpreter process lifecycle.
//!
//! The child runs with a cleared environment and a null stdin. Both output
//! pipes, the exit status and a single deadline are driven from one
//! `select!` loop, so the timeout and the output cap share the same
//! cancellation point. Termination is always SIGKILL with no grace period:
//! the code is untrusted and may ignore cooperative signals.
//!
//! This is isolation by convention only. There is no namespace, seccomp or
//! cgroup confinement, and descendants started by the program are not
//! tracked.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::artifact::Artifact;
use super::types::{Constraints, ExecutionOutcome};
use crate::config::SandboxConfig;
use crate::error::SandboxError;

/// Bytes read from a pipe per wakeup
const READ_CHUNK: usize = 8 * 1024;

/// Runs an artifact to an outcome.
///
/// `ProcessRunner` is the real implementation; the trait lets the
/// execution service be driven by other runners in tests.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(
        &self,
        artifact: &Artifact,
        constraints: &Constraints,
    ) -> Result<ExecutionOutcome, SandboxError>;
}

/// Spawns `<interpreter> <args...> <artifact>` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: String,
    args: Vec<String>,
    search_path: String,
}

impl ProcessRunner {
    pub fn new(interpreter: impl Into<String>, args: Vec<String>, search_path: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args,
            search_path: search_path.into(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            config.interpreter.clone(),
            config.interpreter_args.clone(),
            config.search_path.clone(),
        )
    }

    fn command(&self, artifact: &Artifact) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .args(&self.args)
            .arg(artifact.path())
            // Only what the interpreter needs; no ambient search paths
            .env_clear()
            .env("PATH", &self.search_path)
            .env("PYTHONPATH", "")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = artifact.path().parent() {
            command.current_dir(dir);
        }
        command
    }
}

/// Accumulated output of both streams, bounded by the cap.
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            limit,
        }
    }

    /// Appends a chunk; returns true when the stream went over the cap.
    /// Bytes beyond the cap are discarded.
    fn append(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
        let room = limit.saturating_sub(buffer.len());
        if chunk.len() > room {
            buffer.extend_from_slice(&chunk[..room]);
            true
        } else {
            buffer.extend_from_slice(chunk);
            false
        }
    }

    fn push_stdout(&mut self, chunk: &[u8]) -> bool {
        Self::append(&mut self.stdout, chunk, self.limit)
    }

    fn push_stderr(&mut self, chunk: &[u8]) -> bool {
        Self::append(&mut self.stderr, chunk, self.limit)
    }

    fn into_strings(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }

    fn completed(self, status: ExitStatus) -> ExecutionOutcome {
        let (stdout, stderr) = self.into_strings();
        ExecutionOutcome::Completed {
            exit_code: status.code(),
            stdout,
            stderr,
        }
    }

    fn exceeded(self) -> ExecutionOutcome {
        let limit = self.limit;
        let (stdout, stderr) = self.into_strings();
        ExecutionOutcome::OutputExceeded {
            limit,
            stdout,
            stderr,
        }
    }
}

/// What woke the supervision loop
enum Event {
    Stdout(std::io::Result<usize>),
    Stderr(std::io::Result<usize>),
    Exited(std::io::Result<ExitStatus>),
    Deadline,
}

/// SIGKILLs the child and reaps it so no zombie is left behind.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Err(e) = child.kill().await {
        // Already exited between the last poll and the kill
        debug!("kill of pid {pid:?} failed: {e}");
        if let Err(e) = child.wait().await {
            warn!("Failed to reap pid {pid:?}: {e}");
        }
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(
        &self,
        artifact: &Artifact,
        constraints: &Constraints,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let started = Instant::now();
        let mut child = self.command(artifact).spawn().map_err(|e| {
            SandboxError::Spawn(format!("cannot start {}: {e}", self.interpreter))
        })?;
        let pid = child.id();
        debug!("Spawned {} (pid {pid:?})", self.interpreter);

        let (mut stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                terminate(&mut child, pid).await;
                return Err(SandboxError::Process("child pipes were not captured".into()));
            }
        };

        let mut capture = Capture::new(constraints.max_output_bytes);
        let mut out_buf = [0u8; READ_CHUNK];
        let mut err_buf = [0u8; READ_CHUNK];
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut status: Option<ExitStatus> = None;

        let deadline = tokio::time::sleep_until(started + constraints.wall_clock_timeout);
        tokio::pin!(deadline);

        loop {
            if let Some(status) = status {
                if !stdout_open && !stderr_open {
                    info!(
                        "Process exited with {status} after {}ms",
                        started.elapsed().as_millis()
                    );
                    return Ok(capture.completed(status));
                }
            }

            let event = tokio::select! {
                read = stdout.read(&mut out_buf), if stdout_open => Event::Stdout(read),
                read = stderr.read(&mut err_buf), if stderr_open => Event::Stderr(read),
                waited = child.wait(), if status.is_none() => Event::Exited(waited),
                _ = &mut deadline => Event::Deadline,
            };

            match event {
                Event::Stdout(Ok(0)) => stdout_open = false,
                Event::Stdout(Ok(n)) => {
                    if capture.push_stdout(&out_buf[..n]) {
                        warn!("stdout exceeded {} bytes, killing pid {pid:?}", capture.limit);
                        terminate(&mut child, pid).await;
                        return Ok(capture.exceeded());
                    }
                }
                Event::Stdout(Err(e)) => {
                    warn!("stdout read failed: {e}");
                    stdout_open = false;
                }
                Event::Stderr(Ok(0)) => stderr_open = false,
                Event::Stderr(Ok(n)) => {
                    if capture.push_stderr(&err_buf[..n]) {
                        warn!("stderr exceeded {} bytes, killing pid {pid:?}", capture.limit);
                        terminate(&mut child, pid).await;
                        return Ok(capture.exceeded());
                    }
                }
                Event::Stderr(Err(e)) => {
                    warn!("stderr read failed: {e}");
                    stderr_open = false;
                }
                Event::Exited(Ok(exit)) => status = Some(exit),
                Event::Exited(Err(e)) => {
                    terminate(&mut child, pid).await;
                    return Err(SandboxError::Process(format!(
                        "waiting on pid {pid:?} failed: {e}"
                    )));
                }
                Event::Deadline => {
                    if let Some(status) = status {
                        // A descendant inherited the pipes and outlived the child
                        warn!("Pipes still open at deadline after the process exited");
                        return Ok(capture.completed(status));
                    }
                    warn!(
                        "Process exceeded {}ms, killing pid {pid:?}",
                        constraints.wall_clock_timeout.as_millis()
                    );
                    terminate(&mut child, pid).await;
                    return Ok(ExecutionOutcome::TimedOut {
                        limit: constraints.wall_clock_timeout,
                    });
                }
            }
        }
    }
}
