// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Chute interfaces: interface numbers, subnets and host-side names, and the network sections
//! carrying their addresses.

use chute::{InterfaceSpec, InterfaceType, NetKind, NetworkInterface};
use ipnet::Ipv4Net;
use plan::PlanGraph;
use pool::PoolError;
use tracing::{debug, info};
use uci::UciSection;

use super::{Planner, plan_file};
use crate::context::{ConfFile, UpdateContext};
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::prio;
use crate::reservations::{Allocation, LAN_DEVICE};
use crate::update::UpdateRequest;

pub struct NetworkPlanner;

impl Planner for NetworkPlanner {
    fn name(&self) -> &'static str {
        "network"
    }

    fn plan(&self, _request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError> {
        graph.add(
            prio::GET_NETWORK,
            Op::GetNetworkConfig,
            vec![Op::ReleaseNewResources],
        );
        plan_file(graph, ConfFile::Network);
        Ok(())
    }
}

/// Host-side name of a chute interface: `v<name>.<number>`, within the kernel's limit
#[must_use]
pub fn external_name(name: &str, number: u32) -> String {
    let prefix: String = name.chars().take(9).collect();
    format!("v{prefix}.{number:04}")
}

fn net_kind(kind: InterfaceType) -> NetKind {
    match kind {
        InterfaceType::WifiAp => NetKind::Wifi,
        InterfaceType::Monitor => NetKind::Monitor,
        InterfaceType::Vlan => NetKind::Vlan,
    }
}

/// Keep using an item the chute held before. It may have been released since, e.g. by a
/// reboot while the chute was stopped.
fn keep(ctx: &mut UpdateContext, allocation: Allocation) -> Result<(), UpdateError> {
    let (used, reserved) = match allocation {
        Allocation::Subnet(subnet) => (
            ctx.pools.subnets.is_used(&subnet),
            ctx.pools.subnets.reserve(&subnet, false),
        ),
        Allocation::Number(number) => (
            ctx.pools.numbers.is_used(&number),
            ctx.pools.numbers.reserve(&number, false),
        ),
    };
    match reserved {
        Ok(()) if !used => ctx.allocations.push(allocation),
        Ok(()) | Err(PoolError::OutOfRange(..)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Next pool number not held by another chute and giving a free host-side name. Skipped
/// numbers stay marked as used so that they are not offered again.
fn new_number(ctx: &mut UpdateContext, name: &str) -> Result<u32, UpdateError> {
    loop {
        let number = ctx.pools.numbers.next()?;
        let external = external_name(name, number);
        if let Some(owner) = ctx.reservations.numbers.get(&number) {
            debug!("Interface number {number} is held by {owner}, skipping it");
        } else if let Some(owner) = ctx.reservations.interfaces.owner(&external) {
            debug!("Interface name {external} is held by {owner}, skipping it");
        } else {
            ctx.allocations.push(Allocation::Number(number));
            return Ok(number);
        }
    }
}

/// Next pool subnet not overlapping a reserved network. Overlapping subnets stay marked as
/// used so that they are not offered again.
fn new_subnet(ctx: &mut UpdateContext) -> Result<Ipv4Net, UpdateError> {
    loop {
        let subnet = ctx.pools.subnets.next()?;
        match ctx.reservations.subnets.overlapping(&subnet) {
            Some(owner) => debug!("Subnet {subnet} overlaps a network of {owner}, skipping it"),
            None => {
                ctx.allocations.push(Allocation::Subnet(subnet));
                return Ok(subnet);
            }
        }
    }
}

fn subnet_for(
    ctx: &mut UpdateContext,
    name: &str,
    spec: &InterfaceSpec,
    previous: Option<&NetworkInterface>,
) -> Result<Ipv4Net, UpdateError> {
    if let Some(required) = spec.requirements.ipv4_network {
        let required = required.trunc();
        if let Some(owner) = ctx.reservations.subnets.overlapping(&required)
            && owner != ctx.chute.name
        {
            return Err(UpdateError::ResourceExhausted(format!(
                "network {required} of interface {name} overlaps a network of {owner}"
            )));
        }
        keep(ctx, Allocation::Subnet(required))?;
        return Ok(required);
    }
    match previous.and_then(|p| p.subnet) {
        Some(subnet) => {
            keep(ctx, Allocation::Subnet(subnet))?;
            Ok(subnet)
        }
        None => new_subnet(ctx),
    }
}

fn bind(
    ctx: &mut UpdateContext,
    service: &str,
    name: &str,
    spec: &InterfaceSpec,
) -> Result<NetworkInterface, UpdateError> {
    let kind = net_kind(spec.kind);
    let previous = ctx
        .old
        .as_ref()
        .and_then(|old| old.cache.interface(name))
        .filter(|p| p.kind == kind)
        .cloned();
    let number = match &previous {
        Some(p) => {
            keep(ctx, Allocation::Number(p.ext_intf_number))?;
            p.ext_intf_number
        }
        None => new_number(ctx, name)?,
    };
    let external = external_name(name, number);
    let chute = ctx.chute.name.clone();
    if let Some(owner) = ctx.reservations.interfaces.owner(&external)
        && owner != chute
    {
        return Err(UpdateError::ResourceExhausted(format!(
            "interface name {external} is held by {owner}"
        )));
    }
    ctx.reservations.interfaces.add(&external, &chute);
    ctx.reservations.numbers.insert(number, chute.clone());

    let internal = spec.intf_name.as_deref().unwrap_or(name);
    let mut iface = NetworkInterface::new(name, service, kind, internal, &external, number);
    if kind != NetKind::Monitor {
        let subnet = subnet_for(ctx, name, spec, previous.as_ref())?;
        iface.bind_subnet(subnet);
        ctx.reservations.subnets.add(subnet, &chute);
    }
    iface.mode = match kind {
        NetKind::Wifi => Some("ap".to_string()),
        NetKind::Monitor => Some("monitor".to_string()),
        NetKind::Vlan => None,
    };
    if let Some(wireless) = &spec.wireless {
        iface.ssid.clone_from(&wireless.ssid);
        iface.encryption = Some(wireless.effective_encryption());
        iface.key.clone_from(&wireless.key);
        iface.nasid.clone_from(&wireless.nasid);
        iface.hidden = wireless.hidden;
    }
    iface.dhcp.clone_from(&spec.dhcp);
    iface.dns.clone_from(&spec.dns);
    iface.vlan_id = spec.vlan_id;
    iface.traffic.clone_from(&spec.traffic);
    /* the radio is picked by the wifi planner */
    iface.device = previous.and_then(|p| p.device);
    Ok(iface)
}

/// The network section carrying the host side of an interface
#[must_use]
pub fn network_section(chute: &str, iface: &NetworkInterface) -> Option<UciSection> {
    let section = UciSection::new("interface", Some(&iface.section_name(chute)));
    let section = match iface.kind {
        NetKind::Monitor => return None,
        NetKind::Wifi => section.option("ifname", &iface.external_intf),
        NetKind::Vlan => section
            .option("type", "vlan")
            .option("ifname", &iface.external_intf)
            .option("device", LAN_DEVICE)
            .option_if("vid", iface.vlan_id),
    };
    Some(
        section
            .option("proto", "static")
            .option_if("ipaddr", iface.external_ipaddr)
            .option_if("netmask", iface.netmask),
    )
}

pub(crate) fn get_network_config(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    if ctx.removes() {
        ctx.chute.cache.network_interfaces.clear();
        ctx.sections.insert(ConfFile::Network, vec![]);
        return Ok(());
    }
    if !ctx.deploys() {
        /* a stopped chute keeps its resources but not its network */
        if let Some(old) = &ctx.old {
            ctx.chute.cache.network_interfaces = old.cache.network_interfaces.clone();
        }
        ctx.sections.insert(ConfFile::Network, vec![]);
        return Ok(());
    }

    let specs: Vec<(String, String, InterfaceSpec)> = ctx
        .chute
        .interfaces()
        .map(|(service, name, spec)| (service.to_string(), name.to_string(), spec.clone()))
        .collect();
    let mut interfaces = Vec::with_capacity(specs.len());
    for (service, name, spec) in &specs {
        let iface = bind(ctx, service, name, spec)?;
        info!(
            "Interface {name} of {} is {} ({})",
            ctx.chute.name,
            iface.external_intf,
            iface.subnet.map_or_else(|| "no subnet".to_string(), |s| s.to_string())
        );
        interfaces.push(iface);
    }
    let sections = interfaces
        .iter()
        .filter_map(|iface| network_section(&ctx.chute.name, iface))
        .collect();
    ctx.chute.cache.network_interfaces = interfaces;
    ctx.sections.insert(ConfFile::Network, sections);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn external_names_fit() {
        assert_eq!(external_name("wlan0", 0), "vwlan0.0000");
        assert_eq!(external_name("averylongname", 12), "vaverylong.0012");
        assert!(external_name("abcdefghij", 9999).len() <= 15);
    }

    #[test]
    fn sections_per_kind() {
        let mut wifi = NetworkInterface::new(
            "wlan0",
            "main",
            NetKind::Wifi,
            "wlan0",
            "vwlan0.0000",
            0,
        );
        wifi.bind_subnet("192.168.128.0/24".parse().unwrap());
        let section = network_section("hello", &wifi).unwrap();
        assert_eq!(section.name.as_deref(), Some("hello-wlan0"));
        assert_eq!(section.get("ifname"), Some("vwlan0.0000"));
        assert_eq!(section.get("ipaddr"), Some("192.168.128.1"));
        assert_eq!(section.get("netmask"), Some("255.255.255.0"));

        let mut vlan = NetworkInterface::new(
            "lan10",
            "main",
            NetKind::Vlan,
            "lan10",
            "vlan10.0001",
            1,
        );
        vlan.vlan_id = Some(10);
        vlan.bind_subnet("192.168.129.0/24".parse().unwrap());
        let section = network_section("hello", &vlan).unwrap();
        assert_eq!(section.get("type"), Some("vlan"));
        assert_eq!(section.get("device"), Some("br-lan"));
        assert_eq!(section.get("vid"), Some("10"));

        let monitor = NetworkInterface::new(
            "mon0",
            "main",
            NetKind::Monitor,
            "mon0",
            "vmon0.0002",
            2,
        );
        assert!(network_section("hello", &monitor).is_none());
    }
}
