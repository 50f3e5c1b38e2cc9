// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Plan graphs: priority-ordered lists of operations with compensating undo operations.
//!
//! Planners add plans to a [`PlanGraph`]. Once sorted, the graph is executed plan by plan in
//! ascending priority, insertion order breaking ties. An operation may ask for operations of
//! some kind to be skipped from then on. If an operation fails, the undo operations of every
//! plan executed so far, including the failed one, are run in reverse order.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
#![allow(clippy::missing_errors_doc)]

mod graph;

pub use graph::{AbortOutcome, Operation, OpId, Outcome, Plan, PlanFailure, PlanGraph, PlanResult};

use tracectl::trace_target;
trace_target!("plan", LevelFilter::INFO, &["update"]);
