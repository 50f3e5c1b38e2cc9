// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The host configuration: the node's own declarative network and system configuration,
//! independent of any chute.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use crate::errors::{ConfigError, ConfigResult};
use crate::ifname::InterfaceName;

/// Options we do not model but must carry through a load/save cycle
pub type Extra = BTreeMap<String, serde_yaml_ng::Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Proto {
    #[default]
    Static,
    Dhcp,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Policy {
    #[default]
    Accept,
    Reject,
    Drop,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallDefaults {
    #[serde(default)]
    pub input: Policy,
    #[serde(default)]
    pub output: Policy,
    #[serde(default)]
    pub forward: Policy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conntrack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forwarding {
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conntrack: Option<String>,
}

/// Firewall zone attached to a network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneFirewall {
    #[serde(default)]
    pub defaults: FirewallDefaults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarding: Option<Forwarding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpConfig {
    #[serde(default = "default_leasetime")]
    pub leasetime: String,
    #[serde(default = "default_dhcp_limit")]
    pub limit: u32,
    #[serde(default = "default_dhcp_start")]
    pub start: u32,
}

fn default_leasetime() -> String {
    "12h".to_string()
}
fn default_dhcp_limit() -> u32 {
    100
}
fn default_dhcp_start() -> u32 {
    100
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            leasetime: default_leasetime(),
            limit: default_dhcp_limit(),
            start: default_dhcp_start(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WanConfig {
    pub interface: String,
    #[serde(default = "dhcp_proto")]
    pub proto: Proto,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipaddr: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<Ipv4Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<Ipv4Addr>,
    #[serde(default)]
    pub firewall: ZoneFirewall,
}

fn dhcp_proto() -> Proto {
    Proto::Dhcp
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanConfig {
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub proto: Proto,
    pub ipaddr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<DhcpConfig>,
    #[serde(default)]
    pub firewall: ZoneFirewall,
}

impl LanConfig {
    /// The LAN network, if the netmask is a valid prefix
    #[must_use]
    pub fn network(&self) -> Option<Ipv4Net> {
        let mask = u32::from(self.netmask);
        if mask.count_ones() != mask.leading_ones() {
            return None;
        }
        let prefix = u8::try_from(mask.leading_ones()).ok()?;
        Ipv4Net::new(self.ipaddr, prefix).ok().map(|n| n.trunc())
    }
}

/// A radio. Identified by its probe id (e.g. `pci-wifi-0`) or by MAC address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macaddr: Option<String>,
    pub channel: u32,
    #[serde(default = "default_hwmode")]
    pub hwmode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub htmode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txpower: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

fn default_hwmode() -> String {
    "11g".to_string()
}

impl WifiDevice {
    /// Name used for this radio in generated sections
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.id.as_deref().or(self.macaddr.as_deref())
    }
}

/// An access point (or other virtual interface) of the host itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiInterface {
    pub device: String,
    pub ssid: String,
    #[serde(default = "default_wifi_mode")]
    pub mode: String,
    #[serde(default = "default_wifi_network")]
    pub network: String,
    #[serde(default = "default_encryption")]
    pub encryption: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ifname: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

fn default_wifi_mode() -> String {
    "ap".to_string()
}
fn default_wifi_network() -> String {
    "lan".to_string()
}
fn default_encryption() -> String {
    "none".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlanInterface {
    pub id: u16,
    #[serde(default)]
    pub proto: Proto,
    pub ipaddr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<DhcpConfig>,
    #[serde(default)]
    pub firewall: ZoneFirewall,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirewallConfig {
    #[serde(default)]
    pub defaults: FirewallDefaults,
    /// Free-form rules, rendered as `rule` sections option by option
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OnMissingWifi {
    Warn,
    Reboot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    #[serde(default)]
    pub auto_update: bool,
    pub chute_subnet_pool: Ipv4Net,
    #[serde(default = "default_chute_prefix")]
    pub chute_prefix_size: u8,
    #[serde(rename = "onMissingWiFi", default, skip_serializing_if = "Option::is_none")]
    pub on_missing_wifi: Option<OnMissingWifi>,
}

fn default_chute_prefix() -> u8 {
    24
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZerotierConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub networks: Vec<String>,
}

/////////////////////////////////////////////////////////////////////////
/// The host configuration. `wan`, `lan`, `wifi` and `system` are
/// mandatory: a file lacking any of them does not parse.
/////////////////////////////////////////////////////////////////////////
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub wan: WanConfig,
    pub lan: LanConfig,
    pub wifi: Vec<WifiDevice>,
    #[serde(rename = "wifi-interfaces", default)]
    pub wifi_interfaces: Vec<WifiInterface>,
    #[serde(rename = "vlan-interfaces", default, skip_serializing_if = "Vec::is_empty")]
    pub vlan_interfaces: Vec<VlanInterface>,
    #[serde(default)]
    pub firewall: FirewallConfig,
    pub system: SystemConfig,
    #[serde(default)]
    pub zerotier: ZerotierConfig,
}

impl HostConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml_ng::Error> {
        serde_yaml_ng::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml_ng::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Look up a radio by id or MAC address
    #[must_use]
    pub fn wifi_device(&self, key: &str) -> Option<&WifiDevice> {
        self.wifi
            .iter()
            .find(|d| d.id.as_deref() == Some(key) || d.macaddr.as_deref() == Some(key))
    }

    /////////////////////////////////////////////////////////////////////////
    /// Validate beyond what the schema enforces: references between sections,
    /// interface names and addressing.
    /////////////////////////////////////////////////////////////////////////
    pub fn validate(&self) -> ConfigResult {
        InterfaceName::try_from(self.wan.interface.as_str())?;
        for ifname in &self.lan.interfaces {
            InterfaceName::try_from(ifname.as_str())?;
            if *ifname == self.wan.interface {
                return Err(ConfigError::Validation(format!(
                    "interface {ifname} is both WAN and LAN"
                )));
            }
        }
        if self.lan.network().is_none() {
            return Err(ConfigError::Validation(format!(
                "bad LAN netmask {}",
                self.lan.netmask
            )));
        }

        let mut keys = BTreeSet::new();
        for device in &self.wifi {
            let Some(key) = device.key() else {
                return Err(ConfigError::Validation(
                    "wifi device needs an id or a macaddr".to_string(),
                ));
            };
            if !keys.insert(key) {
                return Err(ConfigError::Validation(format!("duplicate wifi device {key}")));
            }
        }
        for iface in &self.wifi_interfaces {
            if self.wifi_device(&iface.device).is_none() {
                return Err(ConfigError::Validation(format!(
                    "wifi interface {} refers to unknown device {}",
                    iface.ssid, iface.device
                )));
            }
            if iface.encryption != "none" && iface.key.is_none() {
                return Err(ConfigError::Validation(format!(
                    "wifi interface {} uses encryption {} without a key",
                    iface.ssid, iface.encryption
                )));
            }
            if let Some(ifname) = &iface.ifname {
                InterfaceName::try_from(ifname.as_str())?;
            }
        }

        let mut vids = BTreeSet::new();
        for vlan in &self.vlan_interfaces {
            if !(1..=4094).contains(&vlan.id) || !vids.insert(vlan.id) {
                return Err(ConfigError::Validation(format!(
                    "bad or duplicate VLAN id {}",
                    vlan.id
                )));
            }
        }

        let pool = self.system.chute_subnet_pool;
        if self.system.chute_prefix_size < pool.prefix_len() || self.system.chute_prefix_size > 30 {
            return Err(ConfigError::Validation(format!(
                "chute prefix size /{} does not fit in pool {pool}",
                self.system.chute_prefix_size
            )));
        }
        if let Some(lan) = self.lan.network()
            && (pool.contains(&lan) || lan.contains(&pool))
        {
            return Err(ConfigError::Validation(format!(
                "chute subnet pool {pool} overlaps the LAN {lan}"
            )));
        }
        Ok(())
    }
}
