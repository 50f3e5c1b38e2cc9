// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reconciliation of the configuration files with the state of the host.
//!
//! The manager remembers the sections it applied last. A load parses the configuration
//! directory again and only touches what differs: new sections are applied, vanished ones
//! reverted, and changed ones updated in place when their type supports it, or reverted and
//! applied again otherwise. A section whose dependency changed is treated as changed itself.
//! Loading twice the same files runs no command at all.

use exec::{CommandList, Runner};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use uci::UciError;

use crate::errors::ConfdError;
use crate::section::{Commands, ConfigSection, ConfigSet, Env, SectionKey};

/// Outcome of the last load for one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionStatus {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub comment: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SectionStatus {
    fn new(key: &SectionKey, comment: Option<String>, error: Option<String>) -> Self {
        Self {
            file: key.file.clone(),
            kind: key.kind.clone(),
            name: key.name.clone(),
            comment,
            success: error.is_none(),
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Revert,
    Apply,
}

#[derive(Debug, Default)]
struct ManagerState {
    current: ConfigSet,                    /* sections applied by the last load */
    errors: BTreeMap<SectionKey, String>,  /* sections of `current` that failed */
    status: Vec<SectionStatus>,
}

/// The confd manager. Loads are serialized: the commands of one load all run before the
/// next load starts.
#[derive(Debug)]
pub struct ConfigManager {
    config_dir: PathBuf,
    write_dir: PathBuf,
    runner: Runner,
    state: Mutex<ManagerState>,
    system_up: watch::Sender<bool>,
}

/// Order sections so that every section comes after its dependencies. Sections with a
/// missing dependency, in a dependency cycle, or depending on such a section are returned
/// apart with the reason.
fn resolve(set: &ConfigSet) -> (Vec<SectionKey>, BTreeMap<SectionKey, String>) {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        key: &SectionKey,
        set: &ConfigSet,
        marks: &mut BTreeMap<SectionKey, Mark>,
        order: &mut Vec<SectionKey>,
        failed: &mut BTreeMap<SectionKey, String>,
    ) -> bool {
        if failed.contains_key(key) {
            return false;
        }
        match marks.get(key) {
            Some(Mark::Done) => return true,
            Some(Mark::Visiting) => {
                failed.insert(key.clone(), "dependency cycle".to_string());
                return false;
            }
            None => {}
        }
        let Some(section) = set.get(key) else {
            return false;
        };
        marks.insert(key.clone(), Mark::Visiting);
        for dep in section.dependencies(set) {
            let reason = if !set.contains(&dep) {
                Some(format!("missing dependency {dep}"))
            } else if !visit(&dep, set, marks, order, failed) {
                Some(format!("unresolved dependency {dep}"))
            } else {
                None
            };
            if let Some(reason) = reason {
                failed.entry(key.clone()).or_insert(reason);
                marks.remove(key);
                return false;
            }
        }
        marks.insert(key.clone(), Mark::Done);
        order.push(key.clone());
        true
    }

    let mut marks = BTreeMap::new();
    let mut order = vec![];
    let mut failed = BTreeMap::new();
    for key in set.keys() {
        visit(key, set, &mut marks, &mut order, &mut failed);
    }
    (order, failed)
}

fn push(
    list: &mut CommandList<(SectionKey, Phase)>,
    key: &SectionKey,
    phase: Phase,
    cmds: Commands,
) {
    for (prio, cmd) in cmds {
        list.push(prio, cmd, (key.clone(), phase));
    }
}

impl ConfigManager {
    #[must_use]
    pub fn new(
        config_dir: impl Into<PathBuf>,
        write_dir: impl Into<PathBuf>,
        runner: Runner,
    ) -> Self {
        let (system_up, _) = watch::channel(false);
        Self {
            config_dir: config_dir.into(),
            write_dir: write_dir.into(),
            runner,
            state: Mutex::new(ManagerState::default()),
            system_up,
        }
    }

    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    #[must_use]
    pub fn write_dir(&self) -> &Path {
        &self.write_dir
    }

    /// Parse every configuration file. Hidden and temporary files are skipped.
    async fn read_config(&self) -> Result<(ConfigSet, BTreeMap<SectionKey, String>), ConfdError> {
        let mut set = ConfigSet::new();
        let mut errors = BTreeMap::new();
        let io_err = |err| ConfdError::Io {
            path: self.config_dir.display().to_string(),
            err,
        };
        let mut entries = match tokio::fs::read_dir(&self.config_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Configuration directory {} does not exist", self.config_dir.display());
                return Ok((set, errors));
            }
            Err(e) => return Err(io_err(e)),
        };
        let mut files = vec![];
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name.ends_with(".tmp") {
                continue;
            }
            if entry.file_type().await.map_err(io_err)?.is_file() {
                files.push(name);
            }
        }
        files.sort();

        for name in files {
            let path = self.config_dir.join(&name);
            let text = tokio::fs::read_to_string(&path).await.map_err(|err| ConfdError::Io {
                path: path.display().to_string(),
                err,
            })?;
            let parsed = uci::parse(&text).map_err(|e| match e {
                UciError::Syntax { line, reason } => UciError::File { path, line, reason },
                other => other,
            })?;
            for (key, e) in set.add_file(&name, &parsed) {
                warn!("Failed to parse {key}: {e}");
                errors.insert(key, e.to_string());
            }
        }
        Ok((set, errors))
    }

    /// Reload the configuration and converge the host to it. Returns the status of every
    /// section.
    pub async fn load(&self) -> Result<Vec<SectionStatus>, ConfdError> {
        let mut state = self.state.lock().await;
        info!("Loading configuration from {}", self.config_dir.display());

        /* parse and resolve the new configuration */
        let (parsed, parse_errors) = self.read_config().await?;
        let (order, unresolved) = resolve(&parsed);
        for (key, reason) in &unresolved {
            warn!("Skipping {key}: {reason}");
        }
        let mut next = ConfigSet::new();
        for section in parsed.iter().filter(|s| !unresolved.contains_key(&s.key)) {
            next.insert(section.clone());
        }

        let old_env = Env {
            all: &state.current,
            write_dir: &self.write_dir,
        };
        let new_env = Env {
            all: &next,
            write_dir: &self.write_dir,
        };

        /* diff against what was applied last */
        let mut list: CommandList<(SectionKey, Phase)> = CommandList::new();
        let mut errors: BTreeMap<SectionKey, String> = BTreeMap::new();
        let mut changed: BTreeSet<SectionKey> = BTreeSet::new();

        for key in &order {
            let Some(new) = next.get(key) else {
                continue;
            };
            let dep_changed = new.dependencies(&next).iter().any(|d| changed.contains(d));
            let emitted = match state.current.get(key) {
                Some(old) if old.options_match(new) && !dep_changed => {
                    if let Some(e) = state.errors.get(key) {
                        errors.insert(key.clone(), e.clone());
                    }
                    continue;
                }
                Some(old) if new.can_update(old) => {
                    debug!("Updating {key} in place");
                    new.update_revert(old, &old_env)
                        .and_then(|revert| Ok((revert, new.update_apply(old, &new_env)?)))
                }
                Some(old) => {
                    debug!("Replacing {key}");
                    old.revert(&old_env)
                        .and_then(|revert| Ok((revert, new.apply(&new_env)?)))
                }
                None => {
                    debug!("Adding {key}");
                    new.apply(&new_env).map(|apply| (vec![], apply))
                }
            };
            changed.insert(key.clone());
            match emitted {
                Ok((revert, apply)) => {
                    push(&mut list, key, Phase::Revert, revert);
                    push(&mut list, key, Phase::Apply, apply);
                }
                Err(e) => {
                    warn!("Failed to set up {key}: {e}");
                    errors.insert(key.clone(), e.to_string());
                }
            }
        }

        let removed: Vec<&ConfigSection> = state
            .current
            .iter()
            .filter(|s| !next.contains(&s.key))
            .collect();
        for old in removed.into_iter().rev() {
            debug!("Removing {}", old.key);
            match old.revert(&old_env) {
                Ok(cmds) => push(&mut list, &old.key, Phase::Revert, cmds),
                Err(e) => warn!("Failed to revert {}: {e}", old.key),
            }
        }

        /* run the commands */
        for ((key, phase), command, result) in self.runner.execute_list(list).await {
            let result = result.map_err(|e| format!("{command}: {e}"));
            match (phase, result) {
                (Phase::Apply, Err(e)) => {
                    errors.entry(key).or_insert(e);
                }
                (Phase::Revert, Err(e)) => warn!("Revert of {key} failed: {e}"),
                (_, Ok(_)) => {}
            }
        }

        /* record the outcome */
        let mut status: Vec<SectionStatus> = parsed
            .iter()
            .map(|s| {
                let error = unresolved.get(&s.key).or_else(|| errors.get(&s.key)).cloned();
                SectionStatus::new(&s.key, s.comment.clone(), error)
            })
            .collect();
        status.extend(
            parse_errors
                .iter()
                .map(|(key, e)| SectionStatus::new(key, None, Some(e.clone()))),
        );
        let failed = status.iter().filter(|s| !s.success).count();
        info!("Configuration loaded: {} sections, {failed} failed", status.len());

        state.current = next;
        state.errors = errors;
        state.status.clone_from(&status);
        self.system_up.send_replace(true);
        Ok(status)
    }

    /// Revert every applied section
    pub async fn unload(&self) {
        let mut state = self.state.lock().await;
        let env = Env {
            all: &state.current,
            write_dir: &self.write_dir,
        };
        let mut list = CommandList::new();
        let sections: Vec<&ConfigSection> = state.current.iter().collect();
        for section in sections.into_iter().rev() {
            match section.revert(&env) {
                Ok(cmds) => {
                    for (prio, cmd) in cmds {
                        list.push(prio, cmd, section.key.clone());
                    }
                }
                Err(e) => warn!("Failed to revert {}: {e}", section.key),
            }
        }
        info!("Unloading configuration: {} commands", list.len());
        self.runner.execute_list(list).await;
        *state = ManagerState::default();
    }

    /// Status of the last load
    pub async fn status(&self) -> Vec<SectionStatus> {
        self.state.lock().await.status.clone()
    }

    /// Failed sections owned by `owner`
    pub async fn failures_of(&self, owner: &str) -> Vec<SectionStatus> {
        self.state
            .lock()
            .await
            .status
            .iter()
            .filter(|s| !s.success && s.comment.as_deref() == Some(owner))
            .cloned()
            .collect()
    }

    /// Wait for the first load to complete, then return the status
    pub async fn wait_system_up(&self) -> Vec<SectionStatus> {
        let mut rx = self.system_up.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|up| *up).await;
        self.status().await
    }

    #[must_use]
    pub fn is_system_up(&self) -> bool {
        *self.system_up.borrow()
    }
}
