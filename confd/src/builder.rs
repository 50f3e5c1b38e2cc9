// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Utils to build daemon configuration files

use std::fmt::Display;
use std::ops::AddAssign;

/// Lines of a `key=value` daemon configuration file
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ConfigBuilder {
    lines: Vec<String>,
}

impl Display for ConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for s in &self.lines {
            writeln!(f, "{s}")?;
        }
        Ok(())
    }
}

impl ConfigBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }
    /// Append `key=value`
    pub(crate) fn set(&mut self, key: &str, value: impl Display) {
        self.lines.push(format!("{key}={value}"));
    }
    /// Append `key=value` if there is a value
    pub(crate) fn set_if<V: Display>(&mut self, key: &str, value: Option<V>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }
    /// Append a bare flag
    pub(crate) fn flag(&mut self, flag: &str) {
        self.lines.push(flag.to_owned());
    }
}

impl AddAssign<Self> for ConfigBuilder {
    fn add_assign(&mut self, mut rhs: Self) {
        self.lines.append(&mut rhs.lines);
    }
}
impl AddAssign<String> for ConfigBuilder {
    fn add_assign(&mut self, rhs: String) {
        self.lines.push(rhs);
    }
}
impl AddAssign<&str> for ConfigBuilder {
    fn add_assign(&mut self, rhs: &str) {
        self.lines.push(rhs.to_owned());
    }
}

/// Main trait to build daemon configs
pub(crate) trait Render {
    type Context; /* context passed to renderer */
    type Output; /* type of output produced */
    fn render(&self, ctx: &Self::Context) -> Self::Output;
}
