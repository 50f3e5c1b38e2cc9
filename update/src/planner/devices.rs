// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The host itself: loading its configuration, and the sections it owns for a router update

use config::hostconfig::{DhcpConfig, OnMissingWifi, Proto, WifiDevice, ZoneFirewall};
use config::{ConfigError, HostConfig};
use exec::TimeoutClass;
use plan::PlanGraph;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use sysfs::{NetDevice, NetProbe};
use tracing::{error, info, warn};
use uci::UciSection;

use super::{Planner, plan_file};
use crate::context::{ConfFile, UpdateContext};
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::prio;
use crate::reservations::{LAN_DEVICE, Pools, Reservations, host_ap_ifname};
use crate::update::{UpdateClass, UpdateRequest, UpdateType};

pub struct DevicesPlanner;

impl Planner for DevicesPlanner {
    fn name(&self) -> &'static str {
        "devices"
    }

    fn plan(&self, request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError> {
        graph.add(prio::LOAD_HOST_CONFIG, Op::LoadHostConfig, vec![]);
        if request.class() == UpdateClass::Router {
            graph.add(prio::GET_HOST_SECTIONS, Op::GetHostSections, vec![]);
            let files = [
                ConfFile::Network,
                ConfFile::Wireless,
                ConfFile::Firewall,
                ConfFile::Dhcp,
            ];
            for file in files {
                plan_file(graph, file);
            }
            graph.add(prio::SET_HOST_CONFIG, Op::SetHostConfig, vec![Op::RestoreHostConfig]);
        }
        Ok(())
    }
}

/// Load the host configuration the update works with and compute who holds what
pub(crate) fn load_host_config(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    let store = ctx.env.host_store.clone();
    let host = match ctx.kind {
        UpdateType::SetHostConfig => ctx.requested_host.clone().ok_or_else(|| {
            UpdateError::Validation("sethostconfig without a configuration".to_string())
        })?,
        UpdateType::FactoryReset => store.default_config()?,
        _ => store.load()?,
    };
    let exclude = match ctx.kind.class() {
        UpdateClass::Chute => Some(ctx.name.as_str()),
        UpdateClass::Router => {
            ctx.previous_host = store.read().ok();
            None
        }
    };
    ctx.reservations = Reservations::compute(&host, &ctx.env.catalog.list(), exclude);
    ctx.host = Some(host);
    Ok(())
}

fn zone(name: &str, networks: &[String], firewall: &ZoneFirewall, masq: bool) -> UciSection {
    let mut section = UciSection::new("zone", Some(name)).option("name", name);
    for network in networks {
        section = section.list("network", network);
    }
    let defaults = &firewall.defaults;
    let section = section
        .option("input", defaults.input)
        .option("output", defaults.output)
        .option("forward", defaults.forward);
    if masq { section.option("masq", "1") } else { section }
}

fn forwarding(src: &str, firewall: &ZoneFirewall) -> Option<UciSection> {
    firewall.forwarding.as_ref().map(|f| {
        UciSection::new("forwarding", Some(&format!("{src}-{}", f.dest)))
            .option("src", src)
            .option("dest", &f.dest)
    })
}

fn served(network: &str, dhcp: &DhcpConfig) -> [UciSection; 2] {
    [
        UciSection::new("dnsmasq", Some(network)).list("interface", network),
        UciSection::new("dhcp", Some(network))
            .option("interface", network)
            .option("instance", network)
            .option("start", dhcp.start)
            .option("limit", dhcp.limit)
            .option("leasetime", &dhcp.leasetime),
    ]
}

fn addressing(
    section: UciSection,
    proto: Proto,
    ipaddr: Ipv4Addr,
    netmask: Ipv4Addr,
) -> UciSection {
    let section = section.option("proto", proto);
    if proto == Proto::Static {
        section.option("ipaddr", ipaddr).option("netmask", netmask)
    } else {
        section
    }
}

fn find_radio<'a>(radios: &'a [NetDevice], device: &WifiDevice) -> Option<&'a NetDevice> {
    radios.iter().find(|r| {
        (device.id.is_some() && r.id == device.id)
            || device
                .macaddr
                .as_deref()
                .is_some_and(|mac| mac.eq_ignore_ascii_case(&r.mac))
    })
}

/// The sections the host owns, per file
pub fn host_sections(
    host: &HostConfig,
    probe: &dyn NetProbe,
) -> Result<BTreeMap<ConfFile, Vec<UciSection>>, UpdateError> {
    let mut network = vec![];
    let mut wireless = vec![];
    let mut firewall = vec![];
    let mut dhcp = vec![];

    /* wan */
    let wan = &host.wan;
    let mut section = UciSection::new("interface", Some("wan"))
        .option("ifname", &wan.interface)
        .option("proto", wan.proto);
    if wan.proto == Proto::Static {
        section = section
            .option_if("ipaddr", wan.ipaddr)
            .option_if("netmask", wan.netmask)
            .option_if("gateway", wan.gateway);
    }
    network.push(section);
    firewall.push(zone("wan", &["wan".to_string()], &wan.firewall, true));

    /* lan bridge */
    let lan = &host.lan;
    let mut section = UciSection::new("interface", Some("lan")).option("type", "bridge");
    for ifname in &lan.interfaces {
        section = section.list("ifname", ifname);
    }
    network.push(addressing(section, lan.proto, lan.ipaddr, lan.netmask));
    firewall.push(zone("lan", &["lan".to_string()], &lan.firewall, false));
    firewall.extend(forwarding("lan", &lan.firewall));
    if let Some(config) = &lan.dhcp {
        dhcp.extend(served("lan", config));
    }

    /* vlans on the lan bridge */
    for vlan in &host.vlan_interfaces {
        let name = format!("vlan{}", vlan.id);
        let section = UciSection::new("interface", Some(&name))
            .option("type", "vlan")
            .option("ifname", format!("{LAN_DEVICE}.{}", vlan.id))
            .option("device", LAN_DEVICE)
            .option("vid", vlan.id);
        network.push(addressing(section, vlan.proto, vlan.ipaddr, vlan.netmask));
        firewall.push(zone(&name, std::slice::from_ref(&name), &vlan.firewall, false));
        firewall.extend(forwarding(&name, &vlan.firewall));
        if let Some(config) = &vlan.dhcp {
            dhcp.extend(served(&name, config));
        }
    }

    /* radios and the host's own access points */
    let radios = probe.wireless().map_err(ConfigError::Probe)?;
    let mut present = vec![];
    for device in &host.wifi {
        let Some(key) = device.key() else {
            warn!("Ignoring a wifi device with neither id nor macaddr");
            continue;
        };
        let Some(radio) = find_radio(&radios, device) else {
            if host.system.on_missing_wifi == Some(OnMissingWifi::Reboot) {
                return Err(UpdateError::MissingHardware(format!("wifi device {key}")));
            }
            warn!("Wifi device {key} is not present, skipping it");
            continue;
        };
        let Some(phy) = &radio.phy else {
            warn!("Wifi device {key} ({}) has no phy, skipping it", radio.name);
            continue;
        };
        wireless.push(
            UciSection::new("wifi-device", Some(key))
                .option("phy", phy)
                .option("channel", device.channel)
                .option("hwmode", &device.hwmode)
                .option_if("htmode", device.htmode.as_ref())
                .option_if("txpower", device.txpower),
        );
        present.push(key.to_string());
    }
    for (index, iface) in host.wifi_interfaces.iter().enumerate() {
        if !present.contains(&iface.device) {
            continue;
        }
        let ifname = iface.ifname.clone().unwrap_or_else(|| host_ap_ifname(index));
        let mut section = UciSection::new("wifi-iface", Some(&ifname))
            .option("device", &iface.device)
            .option("mode", &iface.mode)
            .option("ifname", &ifname)
            .option("ssid", &iface.ssid)
            .option("encryption", &iface.encryption)
            .option_if("key", iface.key.as_ref())
            .option("network", &iface.network);
        if iface.hidden {
            section = section.option("hidden", "1");
        }
        wireless.push(section);
    }

    /* free-form rules, anonymous */
    for rule in &host.firewall.rules {
        let mut section = UciSection::new("rule", None);
        for (key, value) in rule {
            section = section.option(key, value);
        }
        firewall.push(section);
    }

    Ok(BTreeMap::from([
        (ConfFile::Network, network),
        (ConfFile::Wireless, wireless),
        (ConfFile::Firewall, firewall),
        (ConfFile::Dhcp, dhcp),
    ]))
}

pub(crate) async fn get_host_sections(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    let host = ctx.host()?;
    match host_sections(host, ctx.env.host_store.probe().as_ref()) {
        Ok(sections) => {
            ctx.sections.extend(sections);
            Ok(())
        }
        Err(e @ UpdateError::MissingHardware(_)) => {
            error!("{e}: rebooting");
            let argv = ["reboot".to_string()];
            ctx.env.runner.run(&argv, TimeoutClass::Short).await?;
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// Persist the new host configuration. The boot time update only applies it.
pub(crate) fn set_host_config(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    let host = ctx.host()?.clone();
    if ctx.kind != UpdateType::InitHostConfig {
        ctx.env.host_store.save(&host)?;
        info!("Saved host configuration");
    }
    let space = ctx.pools.subnets.space();
    if space.parent() != host.system.chute_subnet_pool
        || space.prefix() != host.system.chute_prefix_size
    {
        info!(
            "Chute subnet pool is now {}/{}",
            host.system.chute_subnet_pool, host.system.chute_prefix_size
        );
        let mut pools = Pools::new(&host, &ctx.env.settings)?;
        pools.numbers = ctx.pools.numbers.clone();
        for chute in ctx.env.catalog.list().iter().filter(|c| c.is_running()) {
            pools.reclaim(chute);
        }
        ctx.previous_pools = Some(std::mem::replace(&mut ctx.pools, pools));
    }
    Ok(())
}

pub(crate) fn restore_host_config(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    if ctx.kind != UpdateType::InitHostConfig
        && let Some(previous) = &ctx.previous_host
    {
        ctx.env.host_store.save(previous)?;
        info!("Restored host configuration");
    }
    if let Some(pools) = ctx.previous_pools.take() {
        ctx.pools = pools;
    }
    Ok(())
}
