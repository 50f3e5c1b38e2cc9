// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Typed configuration sections

use exec::Command;
use ordermap::OrderMap;
use serde::Serialize;
use std::fmt::Display;
use std::path::Path;
use tracing::debug;
use uci::{UciFile, UciSection};

use crate::dhcp::{Dhcp, Dnsmasq};
use crate::errors::ConfdError;
use crate::firewall::{Forwarding, Redirect, Rule, Zone};
use crate::network::Interface;
use crate::options::Options;
use crate::qos::{QosClass, QosClassgroup, QosClassify, QosInterface};
use crate::wireless::{WifiDevice, WifiIface};

/// Identity of a section: the file it comes from, its type and its name. Anonymous sections
/// are named after their position, like `@rule[2]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SectionKey {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

impl SectionKey {
    #[must_use]
    pub fn new(file: &str, kind: &str, name: &str) -> Self {
        Self {
            file: file.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }
    #[must_use]
    pub fn network(name: &str) -> Self {
        Self::new("network", "interface", name)
    }
}

impl Display for SectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}[{}]", self.file, self.name, self.kind)
    }
}

/// Commands with their priority
pub type Commands = Vec<(i32, Command)>;

/// What sections see of the world when emitting commands
#[derive(Debug, Clone, Copy)]
pub struct Env<'a> {
    pub all: &'a ConfigSet,
    pub write_dir: &'a Path,
}

impl Env<'_> {
    /// Pid file of a daemon instance
    #[must_use]
    pub fn pid_file(&self, daemon: &str, instance: &str) -> std::path::PathBuf {
        self.write_dir.join(format!("{daemon}-{instance}.pid"))
    }
    /// Configuration file of a daemon instance
    #[must_use]
    pub fn conf_file(&self, daemon: &str, instance: &str) -> std::path::PathBuf {
        self.write_dir.join(format!("{daemon}-{instance}.conf"))
    }
}

/// Behaviour of a concrete section type
pub(crate) trait SectionOps: Sized {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError>;

    /// Sections that must be resolved before this one
    fn dependencies(&self, _key: &SectionKey, _all: &ConfigSet) -> Vec<SectionKey> {
        vec![]
    }

    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError>;

    fn revert(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError>;

    /// Whether a change from `old` to `self` can be made without reverting `old` completely
    fn can_update(&self, _old: &Self) -> bool {
        false
    }

    /// Undo the parts of `old` that change. Runs against the old configuration.
    fn update_revert(
        &self,
        old: &Self,
        key: &SectionKey,
        old_env: &Env<'_>,
    ) -> Result<Commands, ConfdError> {
        old.revert(key, old_env)
    }

    /// Set up the parts of `self` that change
    fn update_apply(
        &self,
        _old: &Self,
        key: &SectionKey,
        env: &Env<'_>,
    ) -> Result<Commands, ConfdError> {
        self.apply(key, env)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionBody {
    Interface(Interface),
    WifiDevice(WifiDevice),
    WifiIface(WifiIface),
    Dnsmasq(Dnsmasq),
    Dhcp(Dhcp),
    Zone(Zone),
    Forwarding(Forwarding),
    Redirect(Redirect),
    Rule(Rule),
    QosInterface(QosInterface),
    QosClassgroup(QosClassgroup),
    QosClass(QosClass),
    QosClassify(QosClassify),
}

macro_rules! dispatch {
    ($body:expr, $inner:ident => $e:expr) => {
        match $body {
            SectionBody::Interface($inner) => $e,
            SectionBody::WifiDevice($inner) => $e,
            SectionBody::WifiIface($inner) => $e,
            SectionBody::Dnsmasq($inner) => $e,
            SectionBody::Dhcp($inner) => $e,
            SectionBody::Zone($inner) => $e,
            SectionBody::Forwarding($inner) => $e,
            SectionBody::Redirect($inner) => $e,
            SectionBody::Rule($inner) => $e,
            SectionBody::QosInterface($inner) => $e,
            SectionBody::QosClassgroup($inner) => $e,
            SectionBody::QosClass($inner) => $e,
            SectionBody::QosClassify($inner) => $e,
        }
    };
}

macro_rules! dispatch_pair {
    ($new:expr, $old:expr, ($n:ident, $o:ident) => $e:expr) => {
        match ($new, $old) {
            (SectionBody::Interface($n), SectionBody::Interface($o)) => Some($e),
            (SectionBody::WifiDevice($n), SectionBody::WifiDevice($o)) => Some($e),
            (SectionBody::WifiIface($n), SectionBody::WifiIface($o)) => Some($e),
            (SectionBody::Dnsmasq($n), SectionBody::Dnsmasq($o)) => Some($e),
            (SectionBody::Dhcp($n), SectionBody::Dhcp($o)) => Some($e),
            (SectionBody::Zone($n), SectionBody::Zone($o)) => Some($e),
            (SectionBody::Forwarding($n), SectionBody::Forwarding($o)) => Some($e),
            (SectionBody::Redirect($n), SectionBody::Redirect($o)) => Some($e),
            (SectionBody::Rule($n), SectionBody::Rule($o)) => Some($e),
            (SectionBody::QosInterface($n), SectionBody::QosInterface($o)) => Some($e),
            (SectionBody::QosClassgroup($n), SectionBody::QosClassgroup($o)) => Some($e),
            (SectionBody::QosClass($n), SectionBody::QosClass($o)) => Some($e),
            (SectionBody::QosClassify($n), SectionBody::QosClassify($o)) => Some($e),
            _ => None,
        }
    };
}

impl SectionBody {
    fn parse(file: &str, kind: &str, opts: &Options<'_>) -> Option<Result<Self, ConfdError>> {
        let body = match (file, kind) {
            ("qos", "interface") => QosInterface::parse(opts).map(SectionBody::QosInterface),
            ("qos", "classgroup") => QosClassgroup::parse(opts).map(SectionBody::QosClassgroup),
            ("qos", "class") => QosClass::parse(opts).map(SectionBody::QosClass),
            ("qos", "classify") => QosClassify::parse(opts).map(SectionBody::QosClassify),
            (_, "interface") => Interface::parse(opts).map(SectionBody::Interface),
            (_, "wifi-device") => WifiDevice::parse(opts).map(SectionBody::WifiDevice),
            (_, "wifi-iface") => WifiIface::parse(opts).map(SectionBody::WifiIface),
            (_, "dnsmasq") => Dnsmasq::parse(opts).map(SectionBody::Dnsmasq),
            (_, "dhcp") => Dhcp::parse(opts).map(SectionBody::Dhcp),
            (_, "zone") => Zone::parse(opts).map(SectionBody::Zone),
            (_, "forwarding") => Forwarding::parse(opts).map(SectionBody::Forwarding),
            (_, "redirect") => Redirect::parse(opts).map(SectionBody::Redirect),
            (_, "rule") => Rule::parse(opts).map(SectionBody::Rule),
            _ => return None,
        };
        Some(body)
    }
}

/// A parsed section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSection {
    pub key: SectionKey,
    /// Owner tag: a chute name, or the node's own tag
    pub comment: Option<String>,
    pub body: SectionBody,
}

impl ConfigSection {
    /// Parse a UCI section. `None` for section types confd does not handle.
    pub fn parse(
        file: &str,
        name: &str,
        section: &UciSection,
    ) -> Option<Result<Self, (SectionKey, ConfdError)>> {
        let key = SectionKey::new(file, &section.kind, name);
        let opts = Options::new(&key, section);
        let body = SectionBody::parse(file, &section.kind, &opts)?;
        Some(match body {
            Ok(body) => Ok(Self {
                key,
                comment: section.comment.clone(),
                body,
            }),
            Err(e) => Err((key, e)),
        })
    }

    /// Same content, ignoring metadata such as the owner comment
    #[must_use]
    pub fn options_match(&self, other: &Self) -> bool {
        self.body == other.body
    }

    #[must_use]
    pub fn dependencies(&self, all: &ConfigSet) -> Vec<SectionKey> {
        dispatch!(&self.body, b => b.dependencies(&self.key, all))
    }

    pub fn apply(&self, env: &Env<'_>) -> Result<Commands, ConfdError> {
        dispatch!(&self.body, b => b.apply(&self.key, env))
    }

    pub fn revert(&self, env: &Env<'_>) -> Result<Commands, ConfdError> {
        dispatch!(&self.body, b => b.revert(&self.key, env))
    }

    /// Whether `self` can replace `old` in place
    #[must_use]
    pub fn can_update(&self, old: &Self) -> bool {
        dispatch_pair!(&self.body, &old.body, (n, o) => n.can_update(o)).unwrap_or(false)
    }

    pub fn update_revert(&self, old: &Self, old_env: &Env<'_>) -> Result<Commands, ConfdError> {
        dispatch_pair!(&self.body, &old.body, (n, o) => n.update_revert(o, &self.key, old_env))
            .unwrap_or_else(|| old.revert(old_env))
    }

    pub fn update_apply(&self, old: &Self, env: &Env<'_>) -> Result<Commands, ConfdError> {
        dispatch_pair!(&self.body, &old.body, (n, o) => n.update_apply(o, &self.key, env))
            .unwrap_or_else(|| self.apply(env))
    }
}

/// All sections of a configuration, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSet {
    sections: OrderMap<SectionKey, ConfigSection>,
}

impl ConfigSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the sections of a file into the set. Returns the sections that failed to parse.
    pub fn add_file(&mut self, file: &str, uci: &UciFile) -> Vec<(SectionKey, ConfdError)> {
        let mut errors = vec![];
        let mut counters: OrderMap<&str, usize> = OrderMap::new();
        for section in &uci.sections {
            let index = counters.entry(section.kind.as_str()).or_default();
            let name = section
                .name
                .clone()
                .unwrap_or_else(|| format!("@{}[{index}]", section.kind));
            *index += 1;
            match ConfigSection::parse(file, &name, section) {
                None => debug!("Ignoring section {file}.{name} of type {}", section.kind),
                Some(Ok(parsed)) => self.insert(parsed),
                Some(Err(e)) => errors.push(e),
            }
        }
        errors
    }

    pub fn insert(&mut self, section: ConfigSection) {
        self.sections.insert(section.key.clone(), section);
    }

    #[must_use]
    pub fn get(&self, key: &SectionKey) -> Option<&ConfigSection> {
        self.sections.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &SectionKey) -> bool {
        self.sections.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigSection> {
        self.sections.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &SectionKey> {
        self.sections.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// The network interface of this name
    #[must_use]
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        match self.get(&SectionKey::network(name)).map(|s| &s.body) {
            Some(SectionBody::Interface(i)) => Some(i),
            _ => None,
        }
    }

    /// The Linux device carrying a network interface
    #[must_use]
    pub fn device_of(&self, network: &str) -> Option<String> {
        self.interface(network).map(|i| i.device(network))
    }

    #[must_use]
    pub fn wifi_device(&self, name: &str) -> Option<&WifiDevice> {
        match self.get(&SectionKey::new("wireless", "wifi-device", name)).map(|s| &s.body) {
            Some(SectionBody::WifiDevice(d)) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn zone(&self, name: &str) -> Option<(&SectionKey, &Zone)> {
        self.iter().find_map(|s| match &s.body {
            SectionBody::Zone(z) if z.name == name => Some((&s.key, z)),
            _ => None,
        })
    }

    /// Sections of a type in a file
    pub fn of_kind<'a>(
        &'a self,
        file: &'a str,
        kind: &'a str,
    ) -> impl Iterator<Item = &'a ConfigSection> + 'a {
        self.iter()
            .filter(move |s| s.key.file == file && s.key.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_names_and_unknown_types() {
        let file = uci::parse(
            "config defaults\n\toption input 'ACCEPT'\n\nconfig rule\n\toption src 'wan'\n\toption target 'ACCEPT'\n\nconfig rule\n\toption src 'lan'\n\toption target 'DROP'\n",
        )
        .unwrap();
        let mut set = ConfigSet::new();
        let errors = set.add_file("firewall", &file);
        assert!(errors.is_empty());
        assert_eq!(set.len(), 2);
        assert!(set.contains(&SectionKey::new("firewall", "rule", "@rule[1]")));
    }

    #[test]
    fn parse_errors_are_collected() {
        let file = uci::parse("config wifi-iface 'x'\n\toption ssid 'a'\n").unwrap();
        let mut set = ConfigSet::new();
        let errors = set.add_file("wireless", &file);
        assert_eq!(errors.len(), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn options_match_ignores_comment() {
        let a = uci::parse("config interface 'lan' #one\n\toption proto 'none'\n").unwrap();
        let b = uci::parse("config interface 'lan' #two\n\toption proto 'none'\n").unwrap();
        let (mut sa, mut sb) = (ConfigSet::new(), ConfigSet::new());
        sa.add_file("network", &a);
        sb.add_file("network", &b);
        let key = SectionKey::network("lan");
        let (x, y) = (sa.get(&key).unwrap(), sb.get(&key).unwrap());
        assert!(x.options_match(y));
        assert_ne!(x.comment, y.comment);
    }
}
