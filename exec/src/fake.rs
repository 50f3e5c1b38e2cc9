// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! An executor that runs nothing and records everything

use async_trait::async_trait;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::ExecutionError;
use crate::executor::{BoxedExecutor, Executor, Output, command_to_string};

#[derive(Default)]
struct FakeState {
    commands: Vec<Vec<String>>,
    rules: Vec<(Vec<String>, Output)>, /* argv prefix -> scripted output */
    alive: HashSet<i32>,
    stubborn: HashSet<i32>, /* ignore SIGTERM */
    signals: Vec<(i32, Signal)>,
    counters: HashMap<String, usize>,
}

/// Records every command and answers with scripted outputs. Unscripted commands succeed
/// with empty output.
#[derive(Default)]
pub struct FakeExecutor {
    state: Mutex<FakeState>,
}

impl FakeExecutor {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
    #[must_use]
    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }

    /// Answer commands starting with `prefix` with `output`. Later rules take precedence.
    pub fn on(&self, prefix: &[&str], output: Output) {
        let prefix = prefix.iter().map(|s| (*s).to_string()).collect();
        self.state.lock().rules.push((prefix, output));
    }
    /// Make commands starting with `prefix` exit with `status`
    pub fn fail_on(&self, prefix: &[&str], status: i32) {
        self.on(prefix, Output::failure(status, "scripted failure"));
    }
    pub fn clear_rules(&self) {
        self.state.lock().rules.clear();
    }

    /// Every argv run so far
    #[must_use]
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.state.lock().commands.clone()
    }
    /// Every command run so far, as shell lines
    #[must_use]
    pub fn command_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .map(|argv| command_to_string(argv))
            .collect()
    }
    /// How many times a command starting with `program` ran
    #[must_use]
    pub fn count(&self, program: &str) -> usize {
        self.state.lock().counters.get(program).copied().unwrap_or(0)
    }
    pub fn clear_commands(&self) {
        let mut state = self.state.lock();
        state.commands.clear();
        state.counters.clear();
    }

    /// Pretend a process with this pid exists
    pub fn spawn_process(&self, pid: i32) {
        self.state.lock().alive.insert(pid);
    }
    /// A process that only dies on SIGKILL
    pub fn spawn_stubborn_process(&self, pid: i32) {
        let mut state = self.state.lock();
        state.alive.insert(pid);
        state.stubborn.insert(pid);
    }
    #[must_use]
    pub fn signals(&self) -> Vec<(i32, Signal)> {
        self.state.lock().signals.clone()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn run(&self, argv: &[String], _timeout: Duration) -> Result<Output, ExecutionError> {
        if argv.is_empty() {
            return Err(ExecutionError::Empty);
        }
        let mut state = self.state.lock();
        debug!("fake run: {}", command_to_string(argv));
        state.commands.push(argv.to_vec());
        *state.counters.entry(argv[0].clone()).or_default() += 1;
        let output = state
            .rules
            .iter()
            .rev()
            .find(|(prefix, _)| argv.starts_with(prefix))
            .map(|(_, output)| output.clone())
            .unwrap_or_default();
        Ok(output)
    }

    fn signal(&self, pid: i32, signal: Signal) -> Result<(), ExecutionError> {
        let mut state = self.state.lock();
        state.signals.push((pid, signal));
        if signal == Signal::SIGKILL || !state.stubborn.contains(&pid) {
            state.alive.remove(&pid);
        }
        Ok(())
    }

    fn is_alive(&self, pid: i32) -> bool {
        self.state.lock().alive.contains(&pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn later_rules_win() {
        let fake = FakeExecutor::new();
        fake.on(&["docker"], Output::success().with_stdout("generic"));
        fake.on(&["docker", "inspect"], Output::success().with_stdout("172.17.0.2"));
        let out = fake
            .run(&argv(&["docker", "inspect", "hello"]), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(out.stdout, vec!["172.17.0.2"]);
        let out = fake.run(&argv(&["docker", "ps"]), Duration::ZERO).await.unwrap();
        assert_eq!(out.stdout, vec!["generic"]);
        assert_eq!(fake.count("docker"), 2);
        assert_eq!(fake.command_lines()[0], "docker inspect hello");
    }
}
