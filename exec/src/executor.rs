// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The [`Executor`] seam between the agent and the host

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{CommandFailureInfo, ExecutionError};

/// Render an argv the way it would be typed in a shell (no quoting)
#[must_use]
pub fn command_to_string(argv: &[String]) -> String {
    argv.join(" ")
}

/// Result of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub status: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl Output {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }
    #[must_use]
    pub fn failure(status: i32, stderr: &str) -> Self {
        Self {
            status,
            stdout: vec![],
            stderr: stderr.lines().map(str::to_string).collect(),
        }
    }
    #[must_use]
    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.lines().map(str::to_string).collect();
        self
    }
    #[must_use]
    pub fn ok(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero exit into an error
    pub fn into_result(self, argv: &[String]) -> Result<Output, ExecutionError> {
        if self.ok() {
            return Ok(self);
        }
        Err(ExecutionError::CommandFailure(Box::new(CommandFailureInfo {
            command: command_to_string(argv),
            status: self.status,
            stdout: self.stdout.join("\n"),
            stderr: self.stderr.join("\n"),
        })))
    }
}

pub type BoxedExecutor = Arc<dyn Executor>;

/// Runs processes and signals them.
///
/// - In production, this is a [`HostExecutor`].
/// - Under test, a `FakeExecutor` records what would have run.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `argv` to completion, capturing output line by line. A non-zero exit is not an
    /// error at this level; failing to start or exceeding `timeout` is.
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<Output, ExecutionError>;

    /// Send `signal` to `pid`. Signalling a process that no longer exists is not an error.
    fn signal(&self, pid: i32, signal: Signal) -> Result<(), ExecutionError>;

    /// Whether a process with this pid exists
    fn is_alive(&self, pid: i32) -> bool;
}

#[derive(Debug, Default)]
pub struct HostExecutor {
    counter: AtomicU64,
}

impl HostExecutor {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
    #[must_use]
    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }
}

fn lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Executor for HostExecutor {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<Output, ExecutionError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecutionError::Empty);
        };
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let command = command_to_string(argv);
        debug!("[{id}] running: {command}");

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ExecutionError::ExecutionStart {
                command: command.clone(),
                err,
            })?;

        // on timeout the child future is dropped, which kills the process
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecutionError::Timeout {
                command: command.clone(),
                timeout,
            })?
            .map_err(|err| ExecutionError::ExecutionStart {
                command: command.clone(),
                err,
            })?;

        // terminated by a signal: report as 128 + signo, like a shell would
        let status = output.status.code().unwrap_or_else(|| {
            use std::os::unix::process::ExitStatusExt;
            128 + output.status.signal().unwrap_or(0)
        });
        let output = Output {
            status,
            stdout: lines(&output.stdout),
            stderr: lines(&output.stderr),
        };
        debug!("[{id}] exited with {status}");
        if !output.ok() && !output.stderr.is_empty() {
            debug!("[{id}] stderr: {}", output.stderr.join(" | "));
        }
        Ok(output)
    }

    fn signal(&self, pid: i32, signal: Signal) -> Result<(), ExecutionError> {
        match kill(Pid::from_raw(pid), signal) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(err) => {
                warn!("Failed to send {signal} to {pid}: {err}");
                Err(ExecutionError::Signal { pid, err })
            }
        }
    }

    fn is_alive(&self, pid: i32) -> bool {
        kill(Pid::from_raw(pid), None).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn host_executor_captures_lines() {
        let exec = HostExecutor::new();
        let script = argv(&["sh", "-c", "echo one; echo two; echo err >&2; exit 3"]);
        let out = exec
            .run(&script, Duration::from_secs(5))
            .await
            .expect("Should start");
        assert_eq!(out.status, 3);
        assert_eq!(out.stdout, vec!["one", "two"]);
        assert_eq!(out.stderr, vec!["err"]);
        let err = out.into_result(&argv(&["sh"])).unwrap_err();
        assert_eq!(err.status(), Some(3));
    }

    #[tokio::test]
    async fn host_executor_times_out() {
        let exec = HostExecutor::new();
        let err = exec
            .run(&argv(&["sleep", "5"]), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn host_executor_missing_binary() {
        let exec = HostExecutor::new();
        let err = exec
            .run(&argv(&["/nonexistent/paradrop-binary"]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ExecutionStart { .. }));
        assert!(matches!(
            exec.run(&[], Duration::from_secs(1)).await,
            Err(ExecutionError::Empty)
        ));
    }
}
