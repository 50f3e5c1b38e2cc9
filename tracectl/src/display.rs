// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tables printed by `--show-tracing-targets` and `--show-tracing-tags`

use crate::control::{TargetCfg, TargetCfgDb};
use std::fmt::{self, Display, Formatter};

const TARGET_WIDTH: usize = 40;

fn row(
    f: &mut Formatter<'_>,
    target: &str,
    level: &dyn Display,
    origin: &str,
    tags: &str,
) -> fmt::Result {
    write!(f, "{target:<TARGET_WIDTH$}  {level:>6}  {origin:>6}  {tags}")
}

impl TargetCfg {
    fn origin(&self) -> &'static str {
        if self.custom { "custom" } else { "module" }
    }
}

impl Display for TargetCfg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        row(f, self.target, &self.level, self.origin(), &self.tags.join(","))
    }
}

impl Display for TargetCfgDb {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        row(f, "target", &"level", "origin", "tags")?;
        writeln!(f)?;
        for target in self.targets.values() {
            writeln!(f, "{target}")?;
        }
        row(f, "*", &self.level, "", "")
    }
}

/// The registry listed tag by tag
pub(crate) struct ByTag<'a>(pub(crate) &'a TargetCfgDb);

impl Display for ByTag<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (tag, members) in &self.0.tags {
            writeln!(f, "[{tag}] {} targets", members.len())?;
            for target in self.0.tagged(tag) {
                writeln!(f, "    {:<TARGET_WIDTH$} {}", target.target, target.level)?;
            }
        }
        Ok(())
    }
}
