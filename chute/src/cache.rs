// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The per-chute scratch state filled in by planners during an update

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use uci::UciSection;

use crate::model::{DhcpSpec, TrafficSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NetKind {
    Wifi,
    Vlan,
    Monitor,
}

/// A chute interface once resources have been bound to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// Name in the chute description; unique within the chute
    pub name: String,
    pub service: String,
    #[serde(rename = "type")]
    pub kind: NetKind,
    /// `ap` or `monitor` for wifi interfaces
    pub mode: Option<String>,
    /// Host wifi device (the host config key) the interface is bound to
    pub device: Option<String>,
    pub internal_intf: String,
    pub external_intf: String,
    pub ext_intf_number: u32,
    pub subnet: Option<Ipv4Net>,
    pub netmask: Option<Ipv4Addr>,
    pub external_ipaddr: Option<Ipv4Addr>,
    pub internal_ipaddr: Option<Ipv4Addr>,
    pub ipaddr_with_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nasid: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<DhcpSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic: Option<TrafficSpec>,
}

impl NetworkInterface {
    /// A fresh interface with no address bound yet
    #[must_use]
    pub fn new(
        name: &str,
        service: &str,
        kind: NetKind,
        internal: &str,
        external: &str,
        number: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            service: service.to_string(),
            kind,
            mode: None,
            device: None,
            internal_intf: internal.to_string(),
            external_intf: external.to_string(),
            ext_intf_number: number,
            subnet: None,
            netmask: None,
            external_ipaddr: None,
            internal_ipaddr: None,
            ipaddr_with_prefix: None,
            ssid: None,
            encryption: None,
            key: None,
            nasid: None,
            hidden: false,
            dhcp: None,
            dns: vec![],
            vlan_id: None,
            traffic: None,
        }
    }

    /// Bind a subnet: the host side takes the first address, the chute the second.
    pub fn bind_subnet(&mut self, subnet: Ipv4Net) {
        let base = u32::from(subnet.network());
        let external = Ipv4Addr::from(base.wrapping_add(1));
        let internal = Ipv4Addr::from(base.wrapping_add(2));
        self.subnet = Some(subnet);
        self.netmask = Some(subnet.netmask());
        self.external_ipaddr = Some(external);
        self.internal_ipaddr = Some(internal);
        self.ipaddr_with_prefix = Some(format!("{internal}/{}", subnet.prefix_len()));
    }

    /// Name of the UCI sections describing this interface
    #[must_use]
    pub fn section_name(&self, chute: &str) -> String {
        format!("{chute}-{}", self.name)
    }
}

/// Scratch state of a chute. Typed fields cover what planners share; `extra` holds the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChuteCache {
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    /// Sections this chute owns, per UCI file
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub uci: BTreeMap<String, Vec<UciSection>>,
    /// Service name to container name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, String>,
    /// Service name to image
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ChuteCache {
    #[must_use]
    pub fn interface(&self, name: &str) -> Option<&NetworkInterface> {
        self.network_interfaces.iter().find(|i| i.name == name)
    }

    /// Sections of one UCI file
    #[must_use]
    pub fn sections(&self, file: &str) -> &[UciSection] {
        self.uci.get(file).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bind_subnet_addresses() {
        let mut iface = NetworkInterface::new(
            "wlan0",
            "main",
            NetKind::Wifi,
            "wlan0",
            "vwlan0.0000",
            0,
        );
        iface.bind_subnet("192.168.128.0/24".parse().unwrap());
        assert_eq!(iface.external_ipaddr, Some(Ipv4Addr::new(192, 168, 128, 1)));
        assert_eq!(iface.internal_ipaddr, Some(Ipv4Addr::new(192, 168, 128, 2)));
        assert_eq!(iface.netmask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        assert_eq!(iface.ipaddr_with_prefix.as_deref(), Some("192.168.128.2/24"));
    }

    #[test]
    fn camel_case_and_extra_keys() {
        let mut cache = ChuteCache::default();
        cache
            .network_interfaces
            .push(NetworkInterface::new("wlan0", "main", NetKind::Wifi, "wlan0", "vwlan0.0000", 0));
        cache.extra.insert("legacyKey".to_string(), serde_json::json!(3));
        let json = serde_json::to_value(&cache).unwrap();
        assert_eq!(json["networkInterfaces"][0]["externalIntf"], "vwlan0.0000");
        assert_eq!(json["networkInterfaces"][0]["type"], "wifi");
        assert_eq!(json["legacyKey"], 3);
        let back: ChuteCache = serde_json::from_value(json).unwrap();
        assert_eq!(back, cache);
    }
}
