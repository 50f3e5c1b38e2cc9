// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Chutes: the containerized applications a node runs, their intent schema (`paradrop.yaml`),
//! the scratch cache updates fill in, and the catalog of installed chutes.

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

pub mod cache;
pub mod catalog;
pub mod errors;
pub mod model;
pub mod package;
pub mod version;

pub use cache::{ChuteCache, NetKind, NetworkInterface};
pub use catalog::ChuteCatalog;
pub use errors::ChuteError;
pub use model::{
    Chute, ChuteState, DhcpSpec, FirewallRuleSpec, InterfaceSpec, InterfaceType, PortBinding,
    Requirements, Service, ServiceRequests, ServiceType, TrafficSpec, WebSpec, WirelessSpec,
};
pub use package::{MANIFEST, extract_package};
pub use version::compare_versions;

use tracectl::trace_target;
trace_target!("chute", LevelFilter::INFO, &["update"]);
