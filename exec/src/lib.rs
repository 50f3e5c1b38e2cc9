// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Host command execution.
//!
//! Everything the agent does to the host (configuring links, launching daemons, driving the
//! container runtime) goes through an [`Executor`]. Commands are described by [`Command`]
//! values, queued with a priority in a [`CommandList`], and run by a [`Runner`] that knows the
//! timeout of each command class and how to stop a daemon from its pid file.

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

pub mod command;
pub mod errors;
pub mod executor;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod runner;

pub use command::{Action, Command, CommandList, KillTarget, TimeoutClass};
pub use errors::{CommandFailureInfo, ExecutionError};
pub use executor::{BoxedExecutor, Executor, HostExecutor, Output};
#[cfg(any(test, feature = "testing"))]
pub use fake::FakeExecutor;
pub use runner::{CommandTimeouts, Runner};

use tracectl::trace_target;
trace_target!("exec", LevelFilter::INFO, &["confd"]);
