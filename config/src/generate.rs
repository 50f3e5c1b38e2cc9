// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Default host configuration, derived from the hardware

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use sysfs::{DeviceKind, NetProbe};
use tracing::{debug, info};

use crate::errors::ConfigError;
use crate::hostconfig::{
    DhcpConfig, Extra, FirewallConfig, FirewallDefaults, Forwarding, HostConfig, LanConfig,
    OnMissingWifi, Proto, SystemConfig, WanConfig, WifiDevice, WifiInterface, ZerotierConfig,
    ZoneFirewall,
};

/// Addressing of the LAN and of the chute subnet pool, chosen so as not to collide with the
/// network the WAN sits on.
fn addressing(wan: Option<Ipv4Net>) -> (Ipv4Addr, Ipv4Net) {
    let ten: Ipv4Net = Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap_or_default();
    let private_192: Ipv4Net = Ipv4Net::new(Ipv4Addr::new(192, 168, 0, 0), 16).unwrap_or_default();
    let on_192 = wan.is_some_and(|net| private_192.contains(&net.addr()));
    let on_ten = wan.is_some_and(|net| ten.contains(&net.addr()));
    if on_192 && !on_ten {
        (
            Ipv4Addr::new(10, 42, 0, 1),
            Ipv4Net::new(Ipv4Addr::new(10, 128, 0, 0), 9).unwrap_or_default(),
        )
    } else {
        (
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Net::new(Ipv4Addr::new(192, 168, 128, 0), 17).unwrap_or_default(),
        )
    }
}

fn radio_defaults(index: usize) -> (u32, &'static str, &'static str) {
    // alternate bands so that two radios do not share one
    if index % 2 == 0 {
        (1, "11g", "HT20")
    } else {
        (36, "11a", "VHT80")
    }
}

/// Probe the node and build a host configuration for it:
/// - WAN: the interface with the default route, else the first wired interface
/// - LAN: the other wired interfaces, bridged
/// - WiFi: every radio, the first one carrying an open AP on the LAN
pub fn generate_host_config(probe: &dyn NetProbe) -> Result<HostConfig, ConfigError> {
    let devices = probe.devices()?;
    let wired: Vec<_> = devices.iter().filter(|d| d.kind == DeviceKind::Wired).collect();
    let radios: Vec<_> = devices
        .iter()
        .filter(|d| d.kind == DeviceKind::Wireless)
        .collect();

    let wan_name = match probe.default_route_interface()? {
        Some(name) if devices.iter().any(|d| d.name == name) => name,
        _ => wired.first().map(|d| d.name.clone()).ok_or(ConfigError::NoWan)?,
    };
    let wan_address = probe.ipv4_address(&wan_name)?;
    let (lan_ip, pool) = addressing(wan_address);
    debug!("WAN {wan_name} at {wan_address:?}: LAN {lan_ip}, chute pool {pool}");

    let default_firewall = ZoneFirewall {
        defaults: FirewallDefaults {
            conntrack: Some("1".to_string()),
            ..Default::default()
        },
        forwarding: None,
    };

    let wifi: Vec<WifiDevice> = radios
        .iter()
        .enumerate()
        .map(|(index, radio)| {
            let (channel, hwmode, htmode) = radio_defaults(index);
            WifiDevice {
                id: radio.id.clone(),
                macaddr: None,
                channel,
                hwmode: hwmode.to_string(),
                htmode: Some(htmode.to_string()),
                txpower: None,
                extra: Extra::new(),
            }
        })
        .collect();

    let wifi_interfaces = wifi
        .first()
        .and_then(|radio| radio.id.clone())
        .map(|device| WifiInterface {
            device,
            ssid: "ParaDrop".to_string(),
            mode: "ap".to_string(),
            network: "lan".to_string(),
            encryption: "none".to_string(),
            key: None,
            ifname: Some("hwlan0".to_string()),
            hidden: false,
            extra: Extra::new(),
        })
        .into_iter()
        .collect();

    let config = HostConfig {
        wan: WanConfig {
            interface: wan_name.clone(),
            proto: Proto::Dhcp,
            ipaddr: None,
            netmask: None,
            gateway: None,
            firewall: default_firewall.clone(),
        },
        lan: LanConfig {
            interfaces: wired
                .iter()
                .filter(|d| d.name != wan_name)
                .map(|d| d.name.clone())
                .collect(),
            proto: Proto::Static,
            ipaddr: lan_ip,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            dhcp: Some(DhcpConfig::default()),
            firewall: ZoneFirewall {
                forwarding: Some(Forwarding {
                    dest: "wan".to_string(),
                    conntrack: Some("1".to_string()),
                }),
                ..default_firewall
            },
        },
        wifi,
        wifi_interfaces,
        vlan_interfaces: vec![],
        firewall: FirewallConfig::default(),
        system: SystemConfig {
            auto_update: true,
            chute_subnet_pool: pool,
            chute_prefix_size: 24,
            on_missing_wifi: Some(OnMissingWifi::Warn),
        },
        zerotier: ZerotierConfig::default(),
    };
    config.validate()?;
    info!(
        "Generated host configuration: WAN {}, LAN {:?}, {} radio(s)",
        config.wan.interface,
        config.lan.interfaces,
        config.wifi.len()
    );
    Ok(config)
}
