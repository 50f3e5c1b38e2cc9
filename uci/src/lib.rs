// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! UCI configuration files.
//!
//! A UCI file is a list of `config <type> [name]` blocks holding `option key value` and
//! `list key value` lines. Paradrop tags every block it writes with its owner in a comment
//! after the section name: the name of a chute, or [`HOST_OWNER`] for the node's own sections.
//! Planners replace the blocks of one owner at a time, leaving the others untouched.

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

mod parse;
pub mod section;
pub mod store;

pub use parse::parse;
pub use section::{UciFile, UciSection, UciValue};
pub use store::UciConfigDir;

use std::path::PathBuf;
use tracectl::trace_target;
trace_target!("uci", LevelFilter::INFO, &["confd"]);

/// Owner tag of the sections describing the node itself
pub const HOST_OWNER: &str = "__PARADROP__";

/// The files planners write
pub const CONFIG_FILES: [&str; 5] = ["network", "wireless", "firewall", "dhcp", "qos"];

#[derive(Debug, thiserror::Error)]
pub enum UciError {
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
    #[error("I/O error on {}: {err}", path.display())]
    Io { path: PathBuf, err: std::io::Error },
    #[error("{} line {line}: {reason}", path.display())]
    File {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}
