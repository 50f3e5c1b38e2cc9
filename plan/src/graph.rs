// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Plan graph and its execution

use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use tracing::{debug, error, info, warn};

/// Stable identifier of a kind of operation, regardless of its arguments
pub type OpId = &'static str;

/// What an operation asks of the graph after succeeding
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Continue,
    /// Skip every not-yet-executed plan whose operation has one of these ids
    Skip(Vec<OpId>),
}

/// An operation of a plan. Equality is structural: two operations of the same kind with the
/// same arguments are the same operation and run at most once as an undo.
pub trait Operation: Clone + Debug + Eq + Hash + Send + Sync {
    type Context: Send;
    type Error: Display + Send;

    fn id(&self) -> OpId;

    fn run(
        &self,
        ctx: &mut Self::Context,
    ) -> impl Future<Output = Result<Outcome, Self::Error>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan<O> {
    pub priority: i32,
    pub todo: O,
    pub undo: Vec<O>, /* run in reverse order on abort */
}

/// The failure that halted the execution of a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{op:?} (priority {priority}) failed: {message}")]
pub struct PlanFailure<O: Debug> {
    pub op: O,
    pub priority: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortOutcome<O> {
    /// Every undo operation ran. Isolated failures are reported but did not stop the abort.
    Completed { failures: Vec<(O, String)> },
    /// Two undo operations failed in a row: the abort stopped and the system may be left
    /// in an inconsistent state.
    Unrecoverable { failures: Vec<(O, String)> },
}

impl<O> AbortOutcome<O> {
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, AbortOutcome::Unrecoverable { .. })
    }
    #[must_use]
    pub fn failures(&self) -> &[(O, String)] {
        match self {
            AbortOutcome::Completed { failures } | AbortOutcome::Unrecoverable { failures } => {
                failures
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanResult<O: Debug> {
    Success,
    Aborted {
        failure: PlanFailure<O>,
        abort: AbortOutcome<O>,
    },
}

impl<O: Debug> PlanResult<O> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, PlanResult::Success)
    }
}

#[derive(Debug, Clone)]
pub struct PlanGraph<O> {
    plans: Vec<Plan<O>>,
    skip: HashSet<OpId>,
    cursor: usize,
    executed: Vec<usize>, /* indices into plans */
}

impl<O> Default for PlanGraph<O> {
    fn default() -> Self {
        Self {
            plans: Vec::new(),
            skip: HashSet::new(),
            cursor: 0,
            executed: Vec::new(),
        }
    }
}

impl<O: Operation> PlanGraph<O> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plan. A plan whose operation is already queued is not added twice.
    /// Returns whether the plan was added.
    pub fn add(&mut self, priority: i32, todo: O, undo: Vec<O>) -> bool {
        if self.plans.iter().any(|p| p.todo == todo) {
            debug!("Not adding {todo:?}: already planned");
            return false;
        }
        self.plans.push(Plan {
            priority,
            todo,
            undo,
        });
        true
    }

    /// Order plans by priority. The sort is stable: equal priorities keep insertion order.
    pub fn sort(&mut self) {
        self.plans.sort_by_key(|p| p.priority);
        self.cursor = 0;
        self.executed.clear();
    }

    pub fn register_skip(&mut self, id: OpId) {
        debug!("Operations {id} will be skipped");
        self.skip.insert(id);
    }

    #[must_use]
    pub fn is_skipped(&self, id: OpId) -> bool {
        self.skip.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn plans(&self) -> impl Iterator<Item = &Plan<O>> {
        self.plans.iter()
    }

    /// The next plan to execute. Plans whose operation is skipped are consumed silently.
    pub fn next_plan(&mut self) -> Option<&Plan<O>> {
        while self.cursor < self.plans.len() {
            let index = self.cursor;
            self.cursor += 1;
            let id = self.plans[index].todo.id();
            if self.skip.contains(id) {
                debug!("Skipping {:?}", self.plans[index].todo);
                continue;
            }
            self.executed.push(index);
            return Some(&self.plans[index]);
        }
        None
    }

    /// Operations executed so far, in execution order
    pub fn executed(&self) -> impl Iterator<Item = &O> {
        self.executed.iter().map(|i| &self.plans[*i].todo)
    }

    /// The undo operations of the executed plans: latest plan first, each plan's own undo
    /// list reversed, every distinct operation once.
    #[must_use]
    pub fn abort_list(&self) -> Vec<O> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        for index in self.executed.iter().rev() {
            for op in self.plans[*index].undo.iter().rev() {
                if seen.insert(op.clone()) {
                    list.push(op.clone());
                }
            }
        }
        list
    }

    /// Execute the plans from the cursor on. Stops at the first failure.
    pub async fn execute(&mut self, ctx: &mut O::Context) -> Result<(), PlanFailure<O>> {
        while let Some(plan) = self.next_plan() {
            let todo = plan.todo.clone();
            let priority = plan.priority;
            debug!("Executing {todo:?} (priority {priority})");
            match todo.run(ctx).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Skip(ids)) => ids.into_iter().for_each(|id| self.register_skip(id)),
                Err(e) => {
                    warn!("Operation {todo:?} failed: {e}");
                    return Err(PlanFailure {
                        op: todo,
                        priority,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run the abort list
    pub async fn abort(&self, ctx: &mut O::Context) -> AbortOutcome<O> {
        let list = self.abort_list();
        info!("Aborting: {} undo operations", list.len());
        let mut failures = Vec::new();
        let mut consecutive = 0;
        for op in list {
            debug!("Undoing with {op:?}");
            match op.run(ctx).await {
                Ok(_) => consecutive = 0,
                Err(e) => {
                    warn!("Undo operation {op:?} failed: {e}");
                    failures.push((op, e.to_string()));
                    consecutive += 1;
                    if consecutive > 1 {
                        error!("Second consecutive failure while aborting, giving up");
                        return AbortOutcome::Unrecoverable { failures };
                    }
                }
            }
        }
        AbortOutcome::Completed { failures }
    }

    /// Sort, execute and abort on failure
    pub async fn run(&mut self, ctx: &mut O::Context) -> PlanResult<O> {
        self.sort();
        match self.execute(ctx).await {
            Ok(()) => PlanResult::Success,
            Err(failure) => {
                let abort = self.abort(ctx).await;
                PlanResult::Aborted { failure, abort }
            }
        }
    }
}
