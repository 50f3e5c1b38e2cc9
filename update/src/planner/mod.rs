// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Planners: per-concern modules appending plans to an update's graph.
//!
//! A planner only reads the request. What it plans is decided by the operations at run time,
//! once the host configuration and the installed chute are known.

pub mod devices;
pub mod dhcp;
pub mod firewall;
pub mod haproxy;
pub mod network;
pub mod state;
pub mod traffic;
pub mod wifi;

use plan::PlanGraph;
use tracing::debug;

use crate::context::ConfFile;
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::update::{UpdateClass, UpdateRequest};

pub trait Planner: Send + Sync {
    fn name(&self) -> &'static str;
    fn plan(&self, request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError>;
}

static CHUTE_PLANNERS: [&dyn Planner; 8] = [
    &state::StatePlanner,
    &devices::DevicesPlanner,
    &network::NetworkPlanner,
    &wifi::WifiPlanner,
    &firewall::FirewallPlanner,
    &dhcp::DhcpPlanner,
    &traffic::TrafficPlanner,
    &haproxy::HaproxyPlanner,
];

static ROUTER_PLANNERS: [&dyn Planner; 1] = [&devices::DevicesPlanner];

/// The planners of a class of updates
#[must_use]
pub fn planners(class: UpdateClass) -> &'static [&'static dyn Planner] {
    match class {
        UpdateClass::Chute => &CHUTE_PLANNERS,
        UpdateClass::Router => &ROUTER_PLANNERS,
    }
}

/// Build the sorted plan graph of a request
pub fn plan_update(request: &UpdateRequest) -> Result<PlanGraph<Op>, UpdateError> {
    let mut graph = PlanGraph::new();
    for planner in planners(request.class()) {
        debug!("Planning {} of {} with {}", request.kind, request.name, planner.name());
        planner.plan(request, &mut graph)?;
    }
    graph.sort();
    Ok(graph)
}

/// Write `file`, restoring it on abort, and reload it
pub(crate) fn plan_file(graph: &mut PlanGraph<Op>, file: ConfFile) {
    graph.add(
        file.set_priority(),
        Op::SetUci(file),
        vec![Op::Reload(file), Op::RestoreUci(file)],
    );
    graph.add(file.reload_priority(), Op::Reload(file), vec![]);
}
