// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The update manager: a queue of updates and the single worker running them.
//!
//! Updates run one at a time, in the order they were added. The worker owns the resource
//! pools and lends them to the update it runs. Once the queue drains, the state of every
//! chute is reported.

use parking_lot::Mutex;
use plan::PlanResult;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Notify, oneshot, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::changes::{ChangeLog, ChangeRecord};
use crate::context::{UpdateContext, UpdateEnv};
use crate::errors::UpdateError;
use crate::planner::plan_update;
use crate::report::StateReporter;
use crate::reservations::Pools;
use crate::runtime::wait_ready;
use crate::update::{UpdateRequest, UpdateType};

struct Pending {
    id: u64,
    request: UpdateRequest,
    done: Option<oneshot::Sender<ChangeRecord>>,
}

/// A submitted update
#[derive(Debug)]
pub struct UpdateHandle {
    pub change_id: u64,
    done: oneshot::Receiver<ChangeRecord>,
}

impl UpdateHandle {
    /// Wait for the update to complete
    pub async fn wait(self) -> Result<ChangeRecord, UpdateError> {
        self.done.await.map_err(|_| UpdateError::ShutDown)
    }
}

pub struct UpdateManager {
    env: Arc<UpdateEnv>,
    queue: Mutex<VecDeque<Pending>>,
    notify: Notify,
    changes: ChangeLog,
    reporter: Arc<dyn StateReporter>,
}

impl UpdateManager {
    #[must_use]
    pub fn new(env: Arc<UpdateEnv>, reporter: Arc<dyn StateReporter>) -> Self {
        Self {
            env,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            changes: ChangeLog::new(),
            reporter,
        }
    }

    #[must_use]
    pub fn env(&self) -> &Arc<UpdateEnv> {
        &self.env
    }

    #[must_use]
    pub fn changes(&self) -> &ChangeLog {
        &self.changes
    }

    /// Number of updates waiting to run
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn pending_item(&self, request: UpdateRequest) -> (Pending, UpdateHandle) {
        let id = self.changes.assign_change_id();
        self.changes.record(id, &request);
        let (tx, rx) = oneshot::channel();
        let pending = Pending {
            id,
            request,
            done: Some(tx),
        };
        let handle = UpdateHandle {
            change_id: id,
            done: rx,
        };
        (pending, handle)
    }

    /// Validate and queue an update. Invalid requests never enter the queue.
    pub fn add_update(&self, request: UpdateRequest) -> Result<UpdateHandle, UpdateError> {
        request.validate()?;
        let (pending, handle) = self.pending_item(request);
        debug!(
            "Queued change {}: {} of {}",
            pending.id, pending.request.kind, pending.request.name
        );
        self.queue.lock().push_back(pending);
        self.notify.notify_one();
        Ok(handle)
    }

    /// One-shot work before the first update: wait for the container runtime, apply the
    /// configuration files as they are, rebuild the pools from the installed chutes, and queue
    /// the host configuration and the running chutes ahead of anything else.
    pub async fn bootstrap(&self) -> Result<Pools, UpdateError> {
        let env = &self.env;
        let settings = &env.settings;
        if !wait_ready(
            env.runtime.as_ref(),
            settings.runtime_retries,
            settings.runtime_retry_base(),
        )
        .await
        {
            if settings.reboot_on_runtime_failure {
                error!("Container runtime unavailable, rebooting");
                env.runner
                    .run(&["reboot".to_string()], exec::TimeoutClass::Short)
                    .await?;
            }
            warn!("Container runtime unavailable, chutes will fail to start");
        }

        if let Err(e) = env.confd.load().await {
            warn!("Failed to apply configuration files: {e}");
        }

        let host = env.host_store.load()?;
        let mut pools = Pools::new(&host, settings)?;
        let installed = env.catalog.list();
        /* stopped chutes keep their resources too */
        for chute in &installed {
            pools.reclaim(chute);
        }
        let running: Vec<_> = installed.into_iter().filter(|c| c.is_running()).collect();

        let mut head = vec![UpdateRequest::host(UpdateType::InitHostConfig, None)];
        head.extend(
            running
                .iter()
                .map(|c| UpdateRequest::chute_named(UpdateType::Start, &c.name)),
        );
        let mut queue = self.queue.lock();
        for request in head.into_iter().rev() {
            let (mut pending, _) = self.pending_item(request);
            pending.done = None;
            queue.push_front(pending);
        }
        info!("Bootstrapped: {} running chutes", running.len());
        Ok(pools)
    }

    async fn execute(
        &self,
        request: &UpdateRequest,
        pools: Pools,
    ) -> (Pools, bool, bool, Vec<String>) {
        let mut graph = match plan_update(request) {
            Ok(graph) => graph,
            Err(e) => return (pools, false, false, vec![e.to_string()]),
        };
        let mut ctx = UpdateContext::new(self.env.clone(), request, pools);
        let result = graph.run(&mut ctx).await;
        let pools = ctx.into_pools();
        match result {
            PlanResult::Success => {
                let message = format!("{} of {} succeeded", request.kind, request.name);
                info!("{message}");
                (pools, true, false, vec![message])
            }
            PlanResult::Aborted { failure, abort } => {
                let mut messages = vec![failure.to_string()];
                messages.extend(
                    abort
                        .failures()
                        .iter()
                        .map(|(op, e)| format!("undo {op:?} failed: {e}")),
                );
                let fatal = abort.is_unrecoverable();
                if fatal {
                    error!("Abort of {} of {} did not complete", request.kind, request.name);
                } else {
                    warn!("{} of {} aborted: {failure}", request.kind, request.name);
                }
                (pools, false, fatal, messages)
            }
        }
    }

    async fn process(&self, pending: Pending, pools: Pools) -> Pools {
        let Pending { id, request, done } = pending;
        self.changes.started(id);
        let span = info_span!(
            "update",
            change_id = id,
            chute = %request.name,
            kind = %request.kind
        );
        let (pools, success, fatal, messages) =
            self.execute(&request, pools).instrument(span).await;
        if let Some(record) = self
            .changes
            .complete(id, success, fatal, messages, request.delegated)
            && let Some(done) = done
        {
            /* the submitter may have stopped waiting */
            let _ = done.send(record);
        }
        pools
    }

    /// Run queued updates until the queue is empty, then report. Returns the pools and the
    /// number of updates run.
    pub async fn drain(&self, mut pools: Pools) -> (Pools, usize) {
        let mut count = 0;
        loop {
            let next = self.queue.lock().pop_front();
            let Some(pending) = next else {
                break;
            };
            pools = self.process(pending, pools).await;
            count += 1;
        }
        if count > 0 {
            self.reporter.report(&self.env.catalog.list()).await;
        }
        (pools, count)
    }

    /// The worker: bootstrap, then run updates as they come until `shutdown` turns true
    pub async fn run(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), UpdateError> {
        let mut pools = self.bootstrap().await?;
        loop {
            (pools, _) = self.drain(pools).await;
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                () = self.notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        let dropped = std::mem::take(&mut *self.queue.lock());
        if !dropped.is_empty() {
            warn!("Shutting down with {} updates queued", dropped.len());
        }
        info!("Update worker stopped");
        Ok(())
    }
}
