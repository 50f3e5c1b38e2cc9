// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The chute intent schema, as found in `paradrop.yaml`, and the installed chute built from it

use ipnet::Ipv4Net;
use ordermap::OrderMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cache::ChuteCache;
use crate::errors::ChuteError;

/// Longest chute interface name: external names are derived from it and must stay within the
/// kernel limit once prefixed and suffixed.
pub const MAX_INTERFACE_NAME: usize = 10;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChuteState {
    #[default]
    Invalid,
    Stopped,
    Running,
    Frozen,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceType {
    /// Built from source on a language base image
    Light,
    /// Built from a Dockerfile
    #[default]
    Normal,
    /// Pulled
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum InterfaceType {
    #[serde(rename = "wifi-ap")]
    #[strum(serialize = "wifi-ap")]
    WifiAp,
    #[serde(rename = "monitor")]
    #[strum(serialize = "monitor")]
    Monitor,
    #[serde(rename = "vlan")]
    #[strum(serialize = "vlan")]
    Vlan,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessSpec {
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    /// Defaults to `psk2` when a key is given, `none` otherwise
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default)]
    pub nasid: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub isolate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxassoc: Option<u32>,
}

impl WirelessSpec {
    #[must_use]
    pub fn effective_encryption(&self) -> String {
        match (&self.encryption, &self.key) {
            (Some(e), _) => e.clone(),
            (None, Some(_)) => "psk2".to_string(),
            (None, None) => "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DhcpSpec {
    #[serde(default = "default_leasetime")]
    pub leasetime: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_start")]
    pub start: u32,
    /// Resolve names through a dnsmasq cache; when off, clients get upstream servers directly
    #[serde(default = "default_true")]
    pub cache: bool,
    /// Relay to this server instead of serving addresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<String>,
}

fn default_leasetime() -> String {
    "12h".to_string()
}
fn default_limit() -> u32 {
    100
}
fn default_start() -> u32 {
    100
}
fn default_true() -> bool {
    true
}

impl Default for DhcpSpec {
    fn default() -> Self {
        Self {
            leasetime: default_leasetime(),
            limit: default_limit(),
            start: default_start(),
            cache: true,
            relay: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub hwmode: Option<String>,
    #[serde(default)]
    pub ipv4_network: Option<Ipv4Net>,
}

/// Egress shaping of a chute interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrafficSpec {
    /// kbit/s
    pub upload: u32,
    #[serde(default)]
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    #[serde(rename = "type")]
    pub kind: InterfaceType,
    /// Name inside the container; defaults to the interface key
    #[serde(rename = "intfName", default)]
    pub intf_name: Option<String>,
    #[serde(default)]
    pub wireless: Option<WirelessSpec>,
    #[serde(default)]
    pub dhcp: Option<DhcpSpec>,
    #[serde(default)]
    pub dns: Vec<String>,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(rename = "vlan-id", default)]
    pub vlan_id: Option<u16>,
    #[serde(default)]
    pub traffic: Option<TrafficSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub external: u16,
    pub internal: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequests {
    #[serde(rename = "as-root", default)]
    pub as_root: bool,
    #[serde(rename = "port-bindings", default)]
    pub port_bindings: Vec<PortBinding>,
}

fn command_words<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Line(String),
        Words(Vec<String>),
    }
    Ok(match Option::<Repr>::deserialize(d)? {
        None => vec![],
        Some(Repr::Line(line)) => line.split_whitespace().map(str::to_string).collect(),
        Some(Repr::Words(words)) => words,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "type", default)]
    pub kind: ServiceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "command_words", skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub interfaces: OrderMap<String, InterfaceSpec>,
    #[serde(default)]
    pub requests: ServiceRequests,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSpec {
    pub service: String,
    pub port: u16,
}

/// A developer rule: `from`/`to` tokens are `@host.lan:<port>` for the host side and
/// `<interface>:<port>` for the chute side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRuleSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_rule_type")]
    pub kind: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
}

fn default_rule_type() -> String {
    "redirect".to_string()
}

fn version_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Float(f64),
        Text(String),
    }
    Ok(Option::<Repr>::deserialize(d)?.map(|v| match v {
        Repr::Int(i) => i.to_string(),
        Repr::Float(f) => f.to_string(),
        Repr::Text(s) => s,
    }))
}

/// A chute: its intent as installed, its state, and the cache of its last update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chute {
    pub name: String,
    #[serde(default, deserialize_with = "version_string")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub state: ChuteState,
    #[serde(default)]
    pub services: OrderMap<String, Service>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<WebSpec>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub firewall: Vec<FirewallRuleSpec>,
    /// Where the package was extracted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache: ChuteCache,
}

fn legal_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !name.starts_with('-')
}

impl Chute {
    /// A chute known only by name, as in a start or delete request
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            description: None,
            state: ChuteState::Invalid,
            services: OrderMap::new(),
            web: None,
            environment: BTreeMap::new(),
            firewall: vec![],
            source_dir: None,
            cache: ChuteCache::default(),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, ChuteError> {
        serde_yaml_ng::from_str(text).map_err(|e| ChuteError::Parse(e.to_string()))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ChuteState::Running
    }

    /// Fill what this chute lacks from an earlier version of itself, so that a start or
    /// restart request carrying only a name inherits the full configuration.
    pub fn merge_from(&mut self, old: &Chute) {
        if self.version.is_none() {
            self.version.clone_from(&old.version);
        }
        if self.description.is_none() {
            self.description.clone_from(&old.description);
        }
        if self.services.is_empty() {
            self.services.clone_from(&old.services);
        }
        if self.web.is_none() {
            self.web.clone_from(&old.web);
        }
        if self.environment.is_empty() {
            self.environment.clone_from(&old.environment);
        }
        if self.firewall.is_empty() {
            self.firewall.clone_from(&old.firewall);
        }
        if self.source_dir.is_none() {
            self.source_dir.clone_from(&old.source_dir);
        }
    }

    /// All interfaces across services, as `(service, interface name, spec)`
    pub fn interfaces(&self) -> impl Iterator<Item = (&str, &str, &InterfaceSpec)> {
        self.services.iter().flat_map(|(service, s)| {
            s.interfaces
                .iter()
                .map(move |(name, spec)| (service.as_str(), name.as_str(), spec))
        })
    }

    /// Reject what can never be installed
    pub fn validate(&self) -> Result<(), ChuteError> {
        let invalid = |msg: String| Err(ChuteError::Validation(msg));
        if !legal_name(&self.name) {
            return invalid(format!("illegal chute name '{}'", self.name));
        }
        for (name, service) in &self.services {
            if !legal_name(name) {
                return invalid(format!("illegal service name '{name}'"));
            }
            if service.kind == ServiceType::Image && service.image.is_none() {
                return invalid(format!("service {name} of type image has no image"));
            }
        }
        if let Some(web) = &self.web
            && !self.services.contains_key(&web.service)
        {
            return invalid(format!("web refers to unknown service {}", web.service));
        }
        let mut seen = std::collections::BTreeSet::new();
        for (service, name, spec) in self.interfaces() {
            if name.len() > MAX_INTERFACE_NAME {
                return invalid(format!(
                    "interface name {name} is longer than {MAX_INTERFACE_NAME} characters"
                ));
            }
            let internal = spec.intf_name.as_deref().unwrap_or(name);
            if internal.is_empty()
                || internal.len() > MAX_INTERFACE_NAME
                || !internal.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return invalid(format!("bad interface name '{internal}' in service {service}"));
            }
            if !seen.insert(name) {
                return invalid(format!("interface {name} is declared twice"));
            }
            match spec.kind {
                InterfaceType::WifiAp => {
                    let Some(wireless) = &spec.wireless else {
                        return invalid(format!("wifi interface {name} has no wireless section"));
                    };
                    if wireless.ssid.as_deref().is_none_or(str::is_empty) {
                        return invalid(format!("wifi interface {name} has no ssid"));
                    }
                    let encryption = wireless.effective_encryption();
                    if encryption != "none" && wireless.key.is_none() {
                        return invalid(format!(
                            "wifi interface {name} uses encryption {encryption} without a key"
                        ));
                    }
                }
                InterfaceType::Vlan => match spec.vlan_id {
                    Some(1..=4094) => {}
                    _ => {
                        return invalid(format!(
                            "vlan interface {name} needs a vlan-id in [1, 4094]"
                        ));
                    }
                },
                InterfaceType::Monitor => {}
            }
        }
        for rule in &self.firewall {
            if rule.kind != "redirect" {
                return invalid(format!("unsupported firewall rule type {}", rule.kind));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) const HELLO: &str = r"
name: hello
version: 1
services:
  main:
    type: image
    image: nginx:latest
    interfaces:
      wlan0:
        type: wifi-ap
        intfName: wlan0
        wireless: {ssid: Paradrop, key: password123}
        dhcp: {leasetime: 12h, limit: 100, start: 100}
web: {service: main, port: 80}
";

    #[test]
    fn parse_hello() {
        let chute = Chute::from_yaml(HELLO).expect("Should parse");
        chute.validate().expect("Should be valid");
        assert_eq!(chute.version.as_deref(), Some("1"));
        assert_eq!(chute.state, ChuteState::Invalid);
        let (service, name, spec) = chute.interfaces().next().unwrap();
        assert_eq!((service, name), ("main", "wlan0"));
        assert_eq!(spec.kind, InterfaceType::WifiAp);
        assert_eq!(
            spec.wireless.as_ref().unwrap().effective_encryption(),
            "psk2"
        );
        assert!(spec.dhcp.as_ref().unwrap().cache);
    }

    #[test]
    fn encryption_needs_a_key() {
        let mut chute = Chute::from_yaml(HELLO).unwrap();
        let spec = chute.services["main"].interfaces.get_mut("wlan0").unwrap();
        let wireless = spec.wireless.as_mut().unwrap();
        wireless.key = None;
        wireless.encryption = Some("psk2".to_string());
        assert!(matches!(chute.validate(), Err(ChuteError::Validation(_))));

        let spec = chute.services["main"].interfaces.get_mut("wlan0").unwrap();
        spec.wireless.as_mut().unwrap().encryption = Some("none".to_string());
        chute.validate().expect("open network needs no key");
    }

    #[test]
    fn long_interface_names_are_rejected() {
        let text = HELLO.replace("      wlan0:", "      wlan0123456:");
        let chute = Chute::from_yaml(&text).unwrap();
        assert!(chute.validate().is_err());
    }

    #[test]
    fn merge_inherits_configuration() {
        let old = Chute::from_yaml(HELLO).unwrap();
        let mut start = Chute::named("hello");
        start.merge_from(&old);
        assert_eq!(start.services, old.services);
        assert_eq!(start.version, old.version);
        assert_eq!(start.web, old.web);
    }

    #[test]
    fn command_forms() {
        let chute = Chute::from_yaml(
            "name: c\nservices:\n  a: {type: image, image: x, command: 'python3 -m http.server'}\n  b: {type: image, image: y, command: [sh, -c, 'exit 0']}\n",
        )
        .unwrap();
        assert_eq!(chute.services["a"].command, vec!["python3", "-m", "http.server"]);
        assert_eq!(chute.services["b"].command, vec!["sh", "-c", "exit 0"]);
    }
}
