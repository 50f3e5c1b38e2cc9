// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Updates: typed intents to change a chute or the host configuration, planned into a
//! graph of operations and run one at a time by the update manager. A failed operation
//! aborts the update, undoing what ran before it.

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

pub mod changes;
pub mod context;
pub mod errors;
pub mod manager;
pub mod ops;
pub mod planner;
pub mod prio;
pub mod report;
pub mod reservations;
pub mod runtime;
pub mod update;

pub use changes::{ChangeLog, ChangeRecord, ChangeStatus};
pub use context::{ConfFile, UpdateContext, UpdateEnv};
pub use errors::UpdateError;
pub use manager::{UpdateHandle, UpdateManager};
pub use ops::Op;
pub use report::{LogReporter, StateReporter};
pub use reservations::{Pools, Reservations};
pub use runtime::{ContainerRuntime, DockerCli};
pub use update::{UpdateClass, UpdateRequest, UpdateType};

use tracectl::trace_target;
trace_target!("update", LevelFilter::INFO, &["update"]);
