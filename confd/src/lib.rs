// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The system configurator.
//!
//! Confd owns the low-level network state of the node: interfaces, bridges, VLANs, wireless
//! access points, DHCP servers, firewall rules and traffic shaping. Its input is a directory
//! of UCI files. On every reload, the [`ConfigManager`] parses the files into typed sections,
//! diffs them against the sections it applied last, and runs the minimal set of host commands
//! to converge.

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

/// A process command from displayable words
macro_rules! cmd {
    ($($word:expr),+ $(,)?) => {
        exec::Command::exec([$(($word).to_string()),+])
    };
}

mod builder;
pub mod dhcp;
pub mod errors;
pub mod firewall;
pub mod hostapd;
pub mod manager;
pub mod network;
mod options;
pub mod parsers;
pub mod prio;
pub mod qos;
pub mod section;
pub mod wireless;

pub use errors::ConfdError; // re-export
pub use manager::{ConfigManager, SectionStatus}; // re-export
pub use section::{ConfigSection, ConfigSet, SectionKey}; // re-export

use tracectl::trace_target;
trace_target!("confd", LevelFilter::INFO, &["confd"]);
