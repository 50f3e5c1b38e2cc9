// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Link-time registry of tracing targets.
//!
//! Each agent crate adds its entry to [`TRACING_TARGETS`] through [`trace_target!`]; the
//! binary sees every entry of every crate it links, without any registration call.

use crate::LevelFilter;
use linkme::distributed_slice;

/// One registered target
pub struct STarget {
    pub(crate) target: &'static str,
    pub(crate) name: &'static str,
    pub(crate) level: LevelFilter,
    pub(crate) tags: &'static [&'static str],
    /// the target is a free-form string, not a module path
    pub(crate) custom: bool,
}

impl STarget {
    /// A target named after the module path of its declaration
    #[must_use]
    pub const fn module(
        path: &'static str,
        name: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        Self {
            target: path,
            name,
            level,
            tags,
            custom: false,
        }
    }

    /// A target given as a plain string, its own short name
    #[must_use]
    pub const fn custom(
        target: &'static str,
        level: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        Self {
            target,
            name: target,
            level,
            tags,
            custom: true,
        }
    }
}

#[distributed_slice]
pub static TRACING_TARGETS: [STarget];

#[doc(hidden)]
#[macro_export]
macro_rules! __register_target {
    ($entry:expr) => {
        const _: () = {
            use $crate::LevelFilter;
            use $crate::targets::{STarget, TRACING_TARGETS};
            #[linkme::distributed_slice(TRACING_TARGETS)]
            static ENTRY: STarget = $entry;
        };
    };
}

/// Register the calling module as a tracing target, with a short name, a default level and
/// tags. A tag sets the level of all its targets at once (e.g. `confd=debug`).
#[macro_export]
macro_rules! trace_target {
    ($name:expr, $level:expr, $tags:expr) => {
        $crate::__register_target!($crate::targets::STarget::module(
            module_path!(),
            $name,
            $level,
            $tags
        ));
    };
}

/// Register a target that is not a module path, such as a dependency's crate name
#[macro_export]
macro_rules! custom_target {
    ($target:expr, $level:expr, $tags:expr) => {
        $crate::__register_target!($crate::targets::STarget::custom($target, $level, $tags));
    };
}
