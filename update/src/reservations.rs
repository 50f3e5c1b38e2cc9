// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Pools and reservations as seen by the planners

use chute::Chute;
use config::{HostConfig, Settings};
use ipnet::Ipv4Net;
use pool::{
    DeviceReservations, InterfaceReservationSet, NetworkPool, NumericPool, SubnetReservationSet,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uci::HOST_OWNER;

use crate::errors::UpdateError;

/// Device of the LAN bridge, parent of VLAN sub-interfaces
pub const LAN_DEVICE: &str = "br-lan";

/// Default name of the n-th access point of the host
#[must_use]
pub fn host_ap_ifname(index: usize) -> String {
    format!("hwlan{index}")
}

/// The allocators. Owned by the update worker and lent to one update at a time.
#[derive(Debug, Clone)]
pub struct Pools {
    pub subnets: NetworkPool,
    pub numbers: NumericPool,
}

/// Something taken from a pool during an update, released again if it aborts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Subnet(Ipv4Net),
    Number(u32),
}

impl Pools {
    pub fn new(host: &HostConfig, settings: &Settings) -> Result<Self, UpdateError> {
        Ok(Self {
            subnets: NetworkPool::with_parent(
                host.system.chute_subnet_pool,
                host.system.chute_prefix_size,
            )?,
            numbers: NumericPool::with_size(settings.interface_number_space),
        })
    }

    /// Mark the resources of a chute as used, whatever their current state.
    /// Returns the number of items reclaimed.
    pub fn reclaim(&mut self, chute: &Chute) -> usize {
        let mut count = 0;
        for iface in &chute.cache.network_interfaces {
            if let Some(subnet) = iface.subnet {
                match self.subnets.reserve(&subnet, false) {
                    Ok(()) => count += 1,
                    Err(e) => warn!("Cannot reclaim {subnet} of chute {}: {e}", chute.name),
                }
            }
            match self.numbers.reserve(&iface.ext_intf_number, false) {
                Ok(()) => count += 1,
                Err(e) => warn!(
                    "Cannot reclaim interface number {} of chute {}: {e}",
                    iface.ext_intf_number, chute.name
                ),
            }
        }
        debug!("Reclaimed {count} resources of chute {}", chute.name);
        count
    }

    pub fn release(&mut self, allocation: Allocation) {
        let released = match allocation {
            Allocation::Subnet(subnet) => self.subnets.release(&subnet),
            Allocation::Number(number) => self.numbers.release(&number),
        };
        if !released {
            debug!("{allocation:?} was not in use");
        }
    }

    /// Give back what a chute holds
    pub fn release_chute(&mut self, chute: &Chute) {
        for iface in &chute.cache.network_interfaces {
            if let Some(subnet) = iface.subnet {
                self.release(Allocation::Subnet(subnet));
            }
            self.release(Allocation::Number(iface.ext_intf_number));
        }
    }
}

/// Who holds what, derived from the host configuration and the installed chutes
#[derive(Debug, Clone, Default)]
pub struct Reservations {
    pub devices: DeviceReservations,
    pub interfaces: InterfaceReservationSet,
    pub subnets: SubnetReservationSet,
    /// interface number -> chute
    pub numbers: BTreeMap<u32, String>,
}

impl Reservations {
    /// Recompute reservations, leaving out the chute named `exclude`
    #[must_use]
    pub fn compute(host: &HostConfig, chutes: &[Arc<Chute>], exclude: Option<&str>) -> Self {
        let mut r = Self::default();

        /* the host itself */
        r.interfaces.add(&host.wan.interface, HOST_OWNER);
        for ifname in &host.lan.interfaces {
            r.interfaces.add(ifname, HOST_OWNER);
        }
        r.interfaces.add(LAN_DEVICE, HOST_OWNER);
        if let Some(lan) = host.lan.network() {
            r.subnets.add(lan, HOST_OWNER);
        }
        for (index, iface) in host.wifi_interfaces.iter().enumerate() {
            let ifname = iface.ifname.clone().unwrap_or_else(|| host_ap_ifname(index));
            r.interfaces.add(&ifname, HOST_OWNER);
            r.devices.add(&iface.device, HOST_OWNER, "wifi", Some(&iface.mode));
        }
        for vlan in &host.vlan_interfaces {
            r.interfaces.add(&format!("{LAN_DEVICE}.{}", vlan.id), HOST_OWNER);
            if let Ok(net) = Ipv4Net::with_netmask(vlan.ipaddr, vlan.netmask) {
                r.subnets.add(net.trunc(), HOST_OWNER);
            }
        }

        /* installed chutes */
        for chute in chutes.iter().filter(|c| Some(c.name.as_str()) != exclude) {
            for iface in &chute.cache.network_interfaces {
                r.interfaces.add(&iface.external_intf, &chute.name);
                r.numbers.insert(iface.ext_intf_number, chute.name.clone());
                if let Some(subnet) = iface.subnet {
                    r.subnets.add(subnet, &chute.name);
                }
                if let Some(device) = &iface.device {
                    r.devices.add(device, &chute.name, "wifi", iface.mode.as_deref());
                }
            }
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chute::{NetKind, NetworkInterface};
    use pretty_assertions::assert_eq;

    pub(crate) const HOST: &str = r"
wan:
  interface: eth0
  proto: dhcp
lan:
  interfaces: [eth1]
  ipaddr: 192.168.1.1
  netmask: 255.255.255.0
wifi:
  - id: pci-wifi-0
    channel: 1
wifi-interfaces:
  - device: pci-wifi-0
    ssid: ParaDrop
system:
  chuteSubnetPool: 192.168.128.0/17
";

    fn running(name: &str, subnet: &str, number: u32) -> Arc<Chute> {
        let mut chute = Chute::named(name);
        let mut iface = NetworkInterface::new(
            "wlan0",
            "main",
            NetKind::Wifi,
            "wlan0",
            &format!("vwlan0.{number:04}"),
            number,
        );
        iface.bind_subnet(subnet.parse().unwrap());
        iface.device = Some("pci-wifi-0".to_string());
        iface.mode = Some("ap".to_string());
        chute.cache.network_interfaces.push(iface);
        chute.state = chute::ChuteState::Running;
        Arc::new(chute)
    }

    #[test]
    fn derived_from_host_and_chutes() {
        let host = HostConfig::from_yaml(HOST).unwrap();
        let chutes = vec![
            running("hello", "192.168.128.0/24", 0),
            running("other", "192.168.129.0/24", 1),
        ];
        let r = Reservations::compute(&host, &chutes, Some("other"));
        assert_eq!(r.interfaces.owner("eth0"), Some(HOST_OWNER));
        assert_eq!(r.interfaces.owner("hwlan0"), Some(HOST_OWNER));
        assert_eq!(r.interfaces.owner("vwlan0.0000"), Some("hello"));
        assert!(!r.interfaces.contains("vwlan0.0001"));
        assert_eq!(r.numbers.get(&0).map(String::as_str), Some("hello"));
        assert!(!r.numbers.contains_key(&1));
        assert_eq!(r.subnets.overlapping(&"192.168.1.0/24".parse().unwrap()), Some(HOST_OWNER));
        assert!(!r.subnets.contains(&"192.168.129.0/24".parse().unwrap()));
        assert_eq!(r.devices.count("pci-wifi-0", Some("wifi"), Some("ap")), 2);
    }

    #[test]
    fn reclaim_then_allocate_next() {
        let host = HostConfig::from_yaml(HOST).unwrap();
        let settings = Settings::with_home(std::path::Path::new("/tmp/pd"));
        let mut pools = Pools::new(&host, &settings).unwrap();
        let hello = running("hello", "192.168.128.0/24", 0);
        assert_eq!(pools.reclaim(&hello), 2);
        /* idempotent */
        pools.reclaim(&hello);
        assert_eq!(pools.subnets.next().unwrap().to_string(), "192.168.129.0/24");
        assert_eq!(pools.numbers.next().unwrap(), 1);

        pools.release_chute(&hello);
        assert!(!pools.subnets.is_used(&"192.168.128.0/24".parse().unwrap()));
    }
}
