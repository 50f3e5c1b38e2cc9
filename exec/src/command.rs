// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Commands and priority-ordered command lists

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::PathBuf;

/// Timeout class of a command. Link and firewall tools are expected to return quickly,
/// daemons and the container runtime may not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutClass {
    #[default]
    Short,
    Long,
    Container,
}

/// How a kill command finds its process
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KillTarget {
    Pid(i32),
    /// Read when the command runs, so that it may name a process started by an earlier command.
    PidFile(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Exec {
        argv: Vec<String>,
        class: TimeoutClass,
    },
    Kill(KillTarget),
    WriteFile { path: PathBuf, contents: String },
    RemoveFile(PathBuf),
}

/// A unit of host work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    pub action: Action,
    pub ignore_failure: bool, /* failure is logged but not reported */
}

impl Command {
    #[must_use]
    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: Action::Exec {
                argv: argv.into_iter().map(Into::into).collect(),
                class: TimeoutClass::Short,
            },
            ignore_failure: false,
        }
    }
    #[must_use]
    pub fn kill_pid(pid: i32) -> Self {
        Self {
            action: Action::Kill(KillTarget::Pid(pid)),
            ignore_failure: false,
        }
    }
    #[must_use]
    pub fn kill_pid_file(path: impl Into<PathBuf>) -> Self {
        Self {
            action: Action::Kill(KillTarget::PidFile(path.into())),
            ignore_failure: false,
        }
    }
    #[must_use]
    pub fn write_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            action: Action::WriteFile {
                path: path.into(),
                contents: contents.into(),
            },
            ignore_failure: false,
        }
    }
    #[must_use]
    pub fn remove_file(path: impl Into<PathBuf>) -> Self {
        Self {
            action: Action::RemoveFile(path.into()),
            ignore_failure: false,
        }
    }

    /// Set the timeout class. No effect on commands that are not process executions.
    #[must_use]
    pub fn class(mut self, class: TimeoutClass) -> Self {
        if let Action::Exec { class: c, .. } = &mut self.action {
            *c = class;
        }
        self
    }
    #[must_use]
    pub fn ignore_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }

    /// The argv, if this command runs a process
    #[must_use]
    pub fn argv(&self) -> Option<&[String]> {
        match &self.action {
            Action::Exec { argv, .. } => Some(argv),
            _ => None,
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.action {
            Action::Exec { argv, .. } => write!(f, "{}", argv.join(" ")),
            Action::Kill(KillTarget::Pid(pid)) => write!(f, "kill {pid}"),
            Action::Kill(KillTarget::PidFile(path)) => write!(f, "kill $(cat {})", path.display()),
            Action::WriteFile { path, .. } => write!(f, "write {}", path.display()),
            Action::RemoveFile(path) => write!(f, "rm -f {}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    priority: i32,
    seq: u64,
    tag: T,
    command: Command,
}

/// Commands with a priority and a caller-defined tag (e.g. the section that emitted them).
/// Commands run in ascending priority; equal priorities keep their insertion order.
#[derive(Debug, Clone)]
pub struct CommandList<T> {
    entries: Vec<Entry<T>>,
    seq: u64,
}

impl<T> Default for CommandList<T> {
    fn default() -> Self {
        Self {
            entries: vec![],
            seq: 0,
        }
    }
}

impl<T> CommandList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push(&mut self, priority: i32, command: Command, tag: T) {
        self.entries.push(Entry {
            priority,
            seq: self.seq,
            tag,
            command,
        });
        self.seq += 1;
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the list, returning `(priority, tag, command)` in execution order
    #[must_use]
    pub fn into_sorted(mut self) -> Vec<(i32, T, Command)> {
        self.entries.sort_by_key(|e| (e.priority, e.seq));
        self.entries
            .into_iter()
            .map(|e| (e.priority, e.tag, e.command))
            .collect()
    }

    /// Commands in execution order, without consuming
    pub fn iter_sorted(&self) -> impl Iterator<Item = (i32, &T, &Command)> {
        let mut refs: Vec<_> = self.entries.iter().collect();
        refs.sort_by_key(|e| (e.priority, e.seq));
        refs.into_iter().map(|e| (e.priority, &e.tag, &e.command))
    }
}

impl<T: Clone> CommandList<T> {
    /// Append every entry of `other`, after the entries of `self` for equal priorities
    pub fn extend(&mut self, other: &CommandList<T>) {
        for (priority, tag, command) in other.iter_sorted() {
            self.push(priority, command.clone(), tag.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let mut list = CommandList::new();
        list.push(20, Command::exec(["ip", "link", "set", "b", "up"]), "b");
        list.push(10, Command::exec(["ip", "link", "add", "a"]), "a");
        list.push(20, Command::exec(["ip", "link", "set", "c", "up"]), "c");
        list.push(-5, Command::kill_pid_file("/run/x.pid"), "x");
        let order: Vec<_> = list.into_sorted().into_iter().map(|(_, tag, _)| tag).collect();
        assert_eq!(order, vec!["x", "a", "b", "c"]);
    }

    #[test]
    fn command_display_and_builders() {
        let cmd = Command::exec(["hostapd", "-B", "/tmp/h.conf"])
            .class(TimeoutClass::Long)
            .ignore_failure();
        assert_eq!(cmd.to_string(), "hostapd -B /tmp/h.conf");
        assert!(cmd.ignore_failure);
        assert!(matches!(
            cmd.action,
            Action::Exec {
                class: TimeoutClass::Long,
                ..
            }
        ));
        let kill = Command::kill_pid_file("/run/dnsmasq-x.pid").class(TimeoutClass::Long);
        assert_eq!(kill.to_string(), "kill $(cat /run/dnsmasq-x.pid)");
        assert!(kill.argv().is_none());
    }
}
