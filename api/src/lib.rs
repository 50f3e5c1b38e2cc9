// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The local HTTP API of the node: chute installation and control, host configuration,
//! confd status and provisioning. Requests that change the node are queued as updates and
//! answered with a change id to poll.

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

pub mod auth;
pub mod changes;
pub mod chutes;
pub mod errors;
pub mod server;
pub mod settings;
pub mod state;

pub use auth::Credentials;
pub use errors::ApiError;
pub use server::{router, serve};
pub use state::ApiState;

use tracectl::trace_target;
trace_target!("api", LevelFilter::INFO, &["api"]);
