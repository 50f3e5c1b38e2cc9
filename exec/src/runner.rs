// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Running [`Command`]s against an [`Executor`]

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::{Action, Command, CommandList, KillTarget, TimeoutClass};
use crate::errors::ExecutionError;
use crate::executor::{BoxedExecutor, Output};

/// Timeouts, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTimeouts {
    pub short: f64,       /* ip, iw, iptables, tc */
    pub long: f64,        /* daemons: hostapd, dnsmasq, haproxy */
    pub container: f64,   /* container runtime: pulls and builds */
    pub kill_signal: f64, /* grace period after SIGTERM */
    pub kill: f64,        /* wait after SIGKILL */
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            short: 10.0,
            long: 60.0,
            container: 900.0,
            kill_signal: 2.0,
            kill: 5.0,
        }
    }
}

impl CommandTimeouts {
    #[must_use]
    pub fn for_class(&self, class: TimeoutClass) -> Duration {
        let secs = match class {
            TimeoutClass::Short => self.short,
            TimeoutClass::Long => self.long,
            TimeoutClass::Container => self.container,
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct Runner {
    executor: BoxedExecutor,
    timeouts: CommandTimeouts,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl Runner {
    #[must_use]
    pub fn new(executor: BoxedExecutor, timeouts: CommandTimeouts) -> Self {
        Self { executor, timeouts }
    }
    #[must_use]
    pub fn executor(&self) -> &BoxedExecutor {
        &self.executor
    }
    #[must_use]
    pub fn timeouts(&self) -> &CommandTimeouts {
        &self.timeouts
    }

    /// Run a process and fail on non-zero exit
    pub async fn run(
        &self,
        argv: &[String],
        class: TimeoutClass,
    ) -> Result<Output, ExecutionError> {
        self.executor
            .run(argv, self.timeouts.for_class(class))
            .await?
            .into_result(argv)
    }

    async fn wait_exit(&self, pid: i32, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if !self.executor.is_alive(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL and wait again.
    /// Returns whether the process is gone.
    pub async fn kill(&self, pid: i32) -> Result<bool, ExecutionError> {
        if !self.executor.is_alive(pid) {
            return Ok(true);
        }
        self.executor.signal(pid, Signal::SIGTERM)?;
        if self
            .wait_exit(pid, Duration::from_secs_f64(self.timeouts.kill_signal))
            .await
        {
            return Ok(true);
        }
        warn!("Process {pid} survived SIGTERM, sending SIGKILL");
        self.executor.signal(pid, Signal::SIGKILL)?;
        Ok(self
            .wait_exit(pid, Duration::from_secs_f64(self.timeouts.kill))
            .await)
    }

    async fn read_pid_file(path: &Path) -> Result<Option<i32>, ExecutionError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => text
                .trim()
                .parse::<i32>()
                .map(Some)
                .map_err(|e| ExecutionError::PidFile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ExecutionError::File {
                path: path.to_path_buf(),
                err,
            }),
        }
    }

    async fn write_file(path: &Path, contents: &str) -> Result<(), ExecutionError> {
        let file_err = |err| ExecutionError::File {
            path: path.to_path_buf(),
            err,
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(file_err)?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, contents).await.map_err(file_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(file_err)
    }

    async fn execute_inner(&self, command: &Command) -> Result<Output, ExecutionError> {
        match &command.action {
            Action::Exec { argv, class } => self.run(argv, *class).await,
            Action::Kill(target) => {
                let pid = match target {
                    KillTarget::Pid(pid) => *pid,
                    KillTarget::PidFile(path) => match Self::read_pid_file(path).await? {
                        Some(pid) => pid,
                        None => {
                            debug!("No pid file at {}, nothing to kill", path.display());
                            return Ok(Output::success());
                        }
                    },
                };
                if self.kill(pid).await? {
                    if let KillTarget::PidFile(path) = target {
                        // daemons do not always clean up after SIGKILL
                        let _ = tokio::fs::remove_file(path).await;
                    }
                    Ok(Output::success())
                } else {
                    Err(ExecutionError::StillRunning(pid))
                }
            }
            Action::WriteFile { path, contents } => {
                Self::write_file(path, contents).await?;
                Ok(Output::success())
            }
            Action::RemoveFile(path) => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(Output::success()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(Output::success()),
                Err(err) => Err(ExecutionError::File {
                    path: path.clone(),
                    err,
                }),
            },
        }
    }

    /// Execute a single command. Failures of commands marked `ignore_failure` are logged and
    /// reported as success.
    pub async fn execute(&self, command: &Command) -> Result<Output, ExecutionError> {
        match self.execute_inner(command).await {
            Ok(output) => {
                debug!("Command '{command}' succeeded");
                Ok(output)
            }
            Err(e) if command.ignore_failure => {
                debug!("Command '{command}' failed (ignored): {e}");
                Ok(Output::failure(e.status().unwrap_or(-1), &e.to_string()))
            }
            Err(e) => {
                warn!("Command '{command}' failed: {e}");
                Err(e)
            }
        }
    }

    /// Execute every command of `list` in order. A failure does not stop the commands after
    /// it; each result is returned with the command and its tag.
    pub async fn execute_list<T>(
        &self,
        list: CommandList<T>,
    ) -> Vec<(T, Command, Result<Output, ExecutionError>)> {
        let total = list.len();
        let mut results = Vec::with_capacity(total);
        for (priority, tag, command) in list.into_sorted() {
            debug!("[{priority}] {command}");
            let result = self.execute(&command).await;
            results.push((tag, command, result));
        }
        let failed = results.iter().filter(|(_, _, r)| r.is_err()).count();
        info!("Executed {total} commands, {failed} failed");
        results
    }
}
