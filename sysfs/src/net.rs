// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network device discovery

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

use crate::{SysfsErr, sysfs_root};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Wired,
    Wireless,
    Bridge,
    Virtual,
    Loopback,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Bus {
    Pci,
    Usb,
    Sdio,
    Platform,
    Virtual,
    Other,
}

/// A network interface as found on the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetDevice {
    pub name: String,
    pub mac: String,
    pub kind: DeviceKind,
    pub bus: Bus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phy: Option<String>, /* radios only */
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>, /* radios only: stable id such as pci-wifi-0 */
    #[serde(default)]
    pub path: String, /* canonical device path, orders radios */
}

impl NetDevice {
    #[must_use]
    pub fn new(name: &str, mac: &str, kind: DeviceKind, bus: Bus) -> Self {
        Self {
            name: name.to_string(),
            mac: mac.to_string(),
            kind,
            bus,
            phy: None,
            id: None,
            path: String::new(),
        }
    }
    #[must_use]
    pub fn with_phy(mut self, phy: &str) -> Self {
        self.phy = Some(phy.to_string());
        self
    }
    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }
}

/// Give every radio an id `<bus>-wifi-<n>`, numbering radios of a bus in device path order.
/// Ids only depend on where radios are plugged, not on the interface names the kernel chose.
pub fn assign_wifi_ids(devices: &mut [NetDevice]) {
    let mut radios: Vec<usize> = devices
        .iter()
        .enumerate()
        .filter(|(_, d)| d.kind == DeviceKind::Wireless)
        .map(|(i, _)| i)
        .collect();
    radios.sort_by(|a, b| {
        let (a, b) = (&devices[*a], &devices[*b]);
        (a.bus, &a.path, &a.name).cmp(&(b.bus, &b.path, &b.name))
    });
    let mut per_bus: HashMap<Bus, usize> = HashMap::new();
    for index in radios {
        let device = &mut devices[index];
        let n = per_bus.entry(device.bus).or_default();
        device.id = Some(format!("{}-wifi-{n}", device.bus));
        *n += 1;
    }
}

/// What the agent needs to know about the node's network hardware
pub trait NetProbe: Send + Sync {
    /// All interfaces, sorted by name, radios carrying their id
    fn devices(&self) -> Result<Vec<NetDevice>, SysfsErr>;

    /// Interface carrying the IPv4 default route
    fn default_route_interface(&self) -> Result<Option<String>, SysfsErr>;

    /// First IPv4 address of an interface
    fn ipv4_address(&self, ifname: &str) -> Result<Option<Ipv4Net>, SysfsErr>;

    fn wireless(&self) -> Result<Vec<NetDevice>, SysfsErr> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.kind == DeviceKind::Wireless)
            .collect())
    }

    fn wired(&self) -> Result<Vec<NetDevice>, SysfsErr> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.kind == DeviceKind::Wired)
            .collect())
    }
}

/// Probe backed by sysfs, procfs and netlink
#[derive(Debug, Clone)]
pub struct SysNet {
    class_net: PathBuf,
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn link_name(path: &Path) -> Option<String> {
    std::fs::read_link(path)
        .ok()
        .and_then(|target| target.file_name().and_then(|n| n.to_str()).map(str::to_string))
}

impl SysNet {
    /// Probe the running host
    pub fn host() -> Result<Self, SysfsErr> {
        Ok(Self {
            class_net: sysfs_root()?.join("class/net"),
        })
    }

    /// Probe a directory laid out like `/sys/class/net`
    #[must_use]
    pub fn with_root(class_net: impl Into<PathBuf>) -> Self {
        Self {
            class_net: class_net.into(),
        }
    }

    fn probe_one(&self, name: &str) -> NetDevice {
        let dir = self.class_net.join(name);
        let mac = read_trimmed(&dir.join("address")).unwrap_or_default();
        let loopback = name == "lo" || read_trimmed(&dir.join("type")).as_deref() == Some("772");
        let wireless = dir.join("wireless").exists() || dir.join("phy80211").exists();
        let bridge = dir.join("bridge").exists();
        let device = dir.join("device");
        let physical = device.symlink_metadata().is_ok();

        let bus = if physical {
            link_name(&device.join("subsystem"))
                .and_then(|s| Bus::from_str(&s).ok())
                .unwrap_or(Bus::Other)
        } else {
            Bus::Virtual
        };
        let kind = if loopback {
            DeviceKind::Loopback
        } else if bridge {
            DeviceKind::Bridge
        } else if wireless {
            DeviceKind::Wireless
        } else if !physical {
            DeviceKind::Virtual
        } else {
            DeviceKind::Wired
        };
        let phy = if wireless {
            read_trimmed(&dir.join("phy80211/name")).or_else(|| link_name(&dir.join("phy80211")))
        } else {
            None
        };
        let path = std::fs::canonicalize(&device)
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .unwrap_or_default();

        NetDevice {
            name: name.to_string(),
            mac,
            kind,
            bus,
            phy,
            id: None,
            path,
        }
    }
}

impl NetProbe for SysNet {
    fn devices(&self) -> Result<Vec<NetDevice>, SysfsErr> {
        let mut devices = vec![];
        for entry in std::fs::read_dir(&self.class_net)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("skipping interface with a name that is not UTF-8");
                continue;
            };
            let device = self.probe_one(&name);
            debug!("found {} ({}, {})", device.name, device.kind, device.bus);
            devices.push(device);
        }
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        assign_wifi_ids(&mut devices);
        Ok(devices)
    }

    fn default_route_interface(&self) -> Result<Option<String>, SysfsErr> {
        let routes = procfs::net::route().map_err(|e| SysfsErr::Procfs {
            what: "routes",
            reason: e.to_string(),
        })?;
        Ok(routes
            .into_iter()
            .find(|r| r.destination.is_unspecified() && r.mask.is_unspecified())
            .map(|r| r.iface))
    }

    fn ipv4_address(&self, ifname: &str) -> Result<Option<Ipv4Net>, SysfsErr> {
        Ok(netdev::get_interfaces()
            .into_iter()
            .find(|iface| iface.name == ifname)
            .and_then(|iface| {
                iface
                    .ipv4
                    .first()
                    .and_then(|net| Ipv4Net::new(net.addr(), net.prefix_len()).ok())
            }))
    }
}

/// A node described in memory
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    pub devices: Vec<NetDevice>,
    pub default_route: Option<String>,
    pub addresses: HashMap<String, Ipv4Net>,
}

impl StaticProbe {
    #[must_use]
    pub fn new(devices: Vec<NetDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }
    #[must_use]
    pub fn with_default_route(mut self, ifname: &str, address: Ipv4Net) -> Self {
        self.default_route = Some(ifname.to_string());
        self.addresses.insert(ifname.to_string(), address);
        self
    }
}

impl NetProbe for StaticProbe {
    fn devices(&self) -> Result<Vec<NetDevice>, SysfsErr> {
        let mut devices = self.devices.clone();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        assign_wifi_ids(&mut devices);
        Ok(devices)
    }
    fn default_route_interface(&self) -> Result<Option<String>, SysfsErr> {
        Ok(self.default_route.clone())
    }
    fn ipv4_address(&self, ifname: &str) -> Result<Option<Ipv4Net>, SysfsErr> {
        Ok(self.addresses.get(ifname).copied())
    }
}
