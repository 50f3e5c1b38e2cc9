// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration of a Paradrop node.
//!
//! Two things are configured here: the agent itself ([`Settings`], mostly paths and limits),
//! and the node's own network ([`HostConfig`]), which is declarative, persisted as YAML and
//! regenerated from the hardware whenever it is missing or invalid.

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
#![allow(clippy::struct_excessive_bools)]

pub mod errors;
pub mod generate;
pub mod hostconfig;
pub mod identity;
pub mod ifname;
pub mod settings;
pub mod store;

pub use errors::{ConfigError, ConfigResult}; // re-export
pub use generate::generate_host_config; // re-export
pub use hostconfig::HostConfig; // re-export
pub use identity::Identity; // re-export
pub use ifname::InterfaceName; // re-export
pub use settings::Settings; // re-export
pub use store::HostConfigStore; // re-export

use tracectl::trace_target;
trace_target!("hostconfig", LevelFilter::INFO, &["hostconfig"]);
