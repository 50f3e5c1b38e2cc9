// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command execution errors

use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

/// What a failed command left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailureInfo {
    pub command: String,
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Display for CommandFailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Command [{}] exited with status {}", self.command, self.status)?;
        if !self.stderr.is_empty() {
            write!(f, ": {}", self.stderr.trim_end())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart {
        command: String,
        err: std::io::Error,
    },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),

    #[error("Command [{command}] timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to signal process {pid}: {err}")]
    Signal { pid: i32, err: nix::errno::Errno },

    #[error("Bad pid file {}: {reason}", path.display())]
    PidFile { path: PathBuf, reason: String },

    #[error("Failed to access {}: {err}", path.display())]
    File { path: PathBuf, err: std::io::Error },

    #[error("Process {0} did not exit")]
    StillRunning(i32),

    #[error("Empty command line")]
    Empty,
}

impl ExecutionError {
    /// Exit status of a command that ran to completion, if that is what failed
    #[must_use]
    pub fn status(&self) -> Option<i32> {
        match self {
            ExecutionError::CommandFailure(info) => Some(info.status),
            _ => None,
        }
    }
}
