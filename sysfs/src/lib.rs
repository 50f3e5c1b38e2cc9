// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Probing of the node's network hardware through [sysfs] and procfs.
//!
//! The host configuration of a node is generated from what is found under `/sys/class/net`:
//! which interfaces are wired, which are radios and on which bus they sit, and which one
//! carries the default route. Probing sits behind the [`NetProbe`] trait so that the rest of
//! the agent can be exercised against a synthetic node.
//!
//! [sysfs]: https://www.kernel.org/doc/Documentation/filesystems/sysfs.txt

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

pub mod net;

pub use net::{Bus, DeviceKind, NetDevice, NetProbe, StaticProbe, SysNet};

use std::path::{Path, PathBuf};
use tracectl::trace_target;
use tracing::{info, warn};

trace_target!("sysfs", LevelFilter::INFO, &["hostconfig"]);

/// Errors which might occur when probing
#[derive(Debug, thiserror::Error)]
pub enum SysfsErr {
    /// The path is not under a mounted sysfs
    #[error("path {0:?} is not under sysfs")]
    PathNotUnderSysfs(PathBuf),
    #[error("sysfs is not mounted")]
    NotMounted,
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("failed to read {what} from procfs: {reason}")]
    Procfs { what: &'static str, reason: String },
    /// The kernel names interfaces with ascii; anything else is not trusted and not echoed.
    #[error("path under sysfs is not a valid UTF-8 string")]
    SysfsPathIsNotValidUtf8,
}

/// Locate the mounted sysfs. More than one mount is suspicious but tolerated: the first one is
/// used.
pub fn sysfs_root() -> Result<PathBuf, SysfsErr> {
    let mounts = procfs::mounts().map_err(|e| SysfsErr::Procfs {
        what: "mounts",
        reason: e.to_string(),
    })?;
    let mut sysfs = mounts.into_iter().filter(|m| m.fs_vfstype == "sysfs");
    let Some(first) = sysfs.next() else {
        return Err(SysfsErr::NotMounted);
    };
    if sysfs.next().is_some() {
        warn!("sysfs is mounted at more than one location, using {}", first.fs_file);
    }
    let root = PathBuf::from(first.fs_file);
    check_sysfs(&root)?;
    info!("found sysfs filesystem at {}", root.display());
    Ok(root)
}

/// Insist that `path` lives on a sysfs filesystem
pub fn check_sysfs(path: &Path) -> Result<(), SysfsErr> {
    if path.as_os_str().to_str().is_none() {
        return Err(SysfsErr::SysfsPathIsNotValidUtf8);
    }
    let stats = nix::sys::statfs::statfs(path).map_err(|e| SysfsErr::IoError(e.into()))?;
    if stats.filesystem_type() == nix::sys::statfs::SYSFS_MAGIC {
        Ok(())
    } else {
        Err(SysfsErr::PathNotUnderSysfs(path.to_path_buf()))
    }
}
