// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runtime control of the agent's tracing output.
//!
//! Every crate of the agent declares its tracing target with [`trace_target!`]. The targets are
//! collected at link time, so that the agent binary can list them, and change their level at
//! startup or while running, without any crate having to register itself explicitly.

pub mod control;
pub mod display;
pub mod targets;

// re-exports
pub use control::{LogOutput, TracingControl, TracingError, get_trace_ctl};
pub use tracing_subscriber::filter::LevelFilter;
