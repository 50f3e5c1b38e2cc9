// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! State reports, emitted once the update queue drains

use async_trait::async_trait;
use chute::Chute;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait StateReporter: Send + Sync {
    async fn report(&self, chutes: &[Arc<Chute>]);
}

/// Reports to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait]
impl StateReporter for LogReporter {
    async fn report(&self, chutes: &[Arc<Chute>]) {
        let states: Vec<String> = chutes
            .iter()
            .map(|c| format!("{}@{}", c.name, c.state))
            .collect();
        info!("Chutes: [{}]", states.join(", "));
    }
}
