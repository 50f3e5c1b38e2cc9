// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reservation sets: which chute holds which device, interface name or subnet. These are
//! derived views, rebuilt from the host configuration and the installed chutes whenever an
//! update is planned.

use ipnet::Ipv4Net;
use serde::Serialize;
use std::collections::BTreeMap;

/// One use of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceReservation {
    pub chute: String, /* owner; "__PARADROP__" for the host itself */
    pub kind: String,  /* wifi, lan, vlan */
    pub mode: Option<String>, /* ap, monitor, ... */
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceReservations {
    devices: BTreeMap<String, Vec<DeviceReservation>>,
}

impl DeviceReservations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: &str, chute: &str, kind: &str, mode: Option<&str>) {
        self.devices
            .entry(device.to_string())
            .or_default()
            .push(DeviceReservation {
                chute: chute.to_string(),
                kind: kind.to_string(),
                mode: mode.map(str::to_string),
            });
    }

    #[must_use]
    pub fn get(&self, device: &str) -> &[DeviceReservation] {
        self.devices.get(device).map_or(&[], Vec::as_slice)
    }

    /// Count the reservations of `device` matching `kind` and, if given, `mode`
    #[must_use]
    pub fn count(&self, device: &str, kind: Option<&str>, mode: Option<&str>) -> usize {
        self.get(device)
            .iter()
            .filter(|r| kind.is_none_or(|k| r.kind == k))
            .filter(|r| mode.is_none_or(|m| r.mode.as_deref() == Some(m)))
            .count()
    }

    #[must_use]
    pub fn is_free(&self, device: &str) -> bool {
        self.get(device).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<DeviceReservation>)> {
        self.devices.iter()
    }
}

/// Interface names in use, with their owner
#[derive(Debug, Clone, Default, Serialize)]
pub struct InterfaceReservationSet {
    names: BTreeMap<String, String>,
}

impl InterfaceReservationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns false if the name was already taken
    pub fn add(&mut self, name: &str, owner: &str) -> bool {
        if self.names.contains_key(name) {
            return false;
        }
        self.names.insert(name.to_string(), owner.to_string());
        true
    }
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }
    #[must_use]
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.names.get(name).map(String::as_str)
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.names.iter()
    }
}

/// Subnets in use. Membership is overlap: a subnet is "contained" if it contains, or is
/// contained in, any reserved subnet.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubnetReservationSet {
    subnets: Vec<(Ipv4Net, String)>,
}

impl SubnetReservationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, subnet: Ipv4Net, owner: &str) {
        self.subnets.push((subnet.trunc(), owner.to_string()));
    }
    #[must_use]
    pub fn contains(&self, subnet: &Ipv4Net) -> bool {
        self.overlapping(subnet).is_some()
    }
    /// Owner of a reservation overlapping `subnet`
    #[must_use]
    pub fn overlapping(&self, subnet: &Ipv4Net) -> Option<&str> {
        let subnet = subnet.trunc();
        self.subnets
            .iter()
            .find(|(net, _)| net.contains(&subnet) || subnet.contains(net))
            .map(|(_, owner)| owner.as_str())
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.subnets.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subnets.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &(Ipv4Net, String)> {
        self.subnets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_counts() {
        let mut devices = DeviceReservations::new();
        devices.add("pci-wifi-0", "__PARADROP__", "wifi", Some("ap"));
        devices.add("pci-wifi-0", "hello", "wifi", Some("ap"));
        devices.add("pci-wifi-1", "sniffer", "wifi", Some("monitor"));
        assert_eq!(devices.count("pci-wifi-0", Some("wifi"), Some("ap")), 2);
        assert_eq!(devices.count("pci-wifi-0", Some("wifi"), Some("monitor")), 0);
        assert_eq!(devices.count("pci-wifi-1", None, None), 1);
        assert!(devices.is_free("usb-wifi-0"));
    }

    #[test]
    fn subnet_overlap_both_ways() {
        let mut subnets = SubnetReservationSet::new();
        subnets.add("192.168.128.0/24".parse().unwrap(), "hello");
        assert!(subnets.contains(&"192.168.128.64/26".parse().unwrap()));
        assert!(subnets.contains(&"192.168.0.0/16".parse().unwrap()));
        assert!(!subnets.contains(&"192.168.129.0/24".parse().unwrap()));
        assert_eq!(
            subnets.overlapping(&"192.168.128.1/32".parse().unwrap()),
            Some("hello")
        );
    }

    #[test]
    fn interface_names_are_unique() {
        let mut names = InterfaceReservationSet::new();
        assert!(names.add("vwlan0.0000", "hello"));
        assert!(!names.add("vwlan0.0000", "other"));
        assert_eq!(names.owner("vwlan0.0000"), Some("hello"));
    }
}
