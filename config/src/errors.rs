// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Type for configuration / validation failures

use std::path::PathBuf;
use sysfs::SysfsErr;
use thiserror::Error;

use crate::ifname::IllegalInterfaceName;

/// The reasons why we may reject or fail to load a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Missing mandatory section: {0}")]
    MissingSection(&'static str),
    #[error(transparent)]
    InterfaceName(#[from] IllegalInterfaceName),
    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),
    #[error("I/O error on {}: {err}", path.display())]
    Io { path: PathBuf, err: std::io::Error },
    #[error("Failed to lock {}: {err}", path.display())]
    Lock {
        path: PathBuf,
        err: nix::errno::Errno,
    },
    #[error("Failed to probe the system: {0}")]
    Probe(#[from] SysfsErr),
    #[error("No usable WAN interface found")]
    NoWan,
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ConfigError {
        let path = path.into();
        move |err| ConfigError::Io { path, err }
    }
}

/// Result-like type for configurations
pub type ConfigResult = Result<(), ConfigError>;
