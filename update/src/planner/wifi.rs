// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Radio selection for wifi interfaces, and their wireless sections

use chute::{NetKind, NetworkInterface, WirelessSpec};
use config::HostConfig;
use plan::PlanGraph;
use tracing::debug;
use uci::UciSection;

use super::{Planner, plan_file};
use crate::context::{ConfFile, UpdateContext};
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::prio;
use crate::reservations::Reservations;
use crate::update::UpdateRequest;

pub struct WifiPlanner;

impl Planner for WifiPlanner {
    fn name(&self) -> &'static str {
        "wifi"
    }

    fn plan(&self, _request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError> {
        graph.add(prio::GET_WIRELESS, Op::GetWirelessConfig, vec![]);
        plan_file(graph, ConfFile::Wireless);
        Ok(())
    }
}

/// Whether `device` can take one more interface in `mode`. An access point shares its radio
/// with at most `max_ap` others; a monitor wants the radio for itself.
fn accepts(reservations: &Reservations, device: &str, mode: &str, max_ap: usize) -> bool {
    let devices = &reservations.devices;
    match mode {
        "ap" => {
            devices.count(device, Some("wifi"), Some("monitor")) == 0
                && devices.count(device, Some("wifi"), Some("ap")) < max_ap
        }
        _ => devices.is_free(device),
    }
}

/// Pick a radio for an interface. The radio used before is kept while it still fits.
#[must_use]
pub fn choose_device(
    host: &HostConfig,
    reservations: &Reservations,
    previous: Option<&str>,
    mode: &str,
    hwmode: Option<&str>,
    max_ap: usize,
) -> Option<String> {
    let candidates: Vec<&str> = host
        .wifi
        .iter()
        .filter(|d| hwmode.is_none_or(|m| d.hwmode == m))
        .filter_map(|d| d.key())
        .collect();
    previous
        .into_iter()
        .chain(candidates.iter().copied())
        .filter(|device| candidates.contains(device))
        .find(|device| accepts(reservations, device, mode, max_ap))
        .map(ToString::to_string)
}

fn wifi_iface(
    chute: &str,
    iface: &NetworkInterface,
    device: &str,
    spec: Option<&WirelessSpec>,
) -> UciSection {
    let section = UciSection::new("wifi-iface", Some(&iface.section_name(chute)))
        .option("device", device)
        .option("mode", iface.mode.as_deref().unwrap_or("ap"))
        .option("ifname", &iface.external_intf);
    if iface.kind == NetKind::Monitor {
        return section;
    }
    let mut section = section
        .option("network", iface.section_name(chute))
        .option_if("ssid", iface.ssid.as_ref())
        .option("encryption", iface.encryption.as_deref().unwrap_or("none"))
        .option_if("key", iface.key.as_ref())
        .option_if("nasid", iface.nasid.as_ref());
    if iface.hidden {
        section = section.option("hidden", "1");
    }
    if let Some(spec) = spec {
        if spec.isolate {
            section = section.option("isolate", "1");
        }
        section = section.option_if("maxassoc", spec.maxassoc);
    }
    section
}

pub(crate) fn get_wireless_config(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    if !ctx.deploys() {
        ctx.sections.insert(ConfFile::Wireless, vec![]);
        return Ok(());
    }
    let host = ctx.host()?.clone();
    let max_ap = ctx.env.settings.max_ap_interfaces;
    let chute = ctx.chute.name.clone();
    let mut sections = vec![];
    for index in 0..ctx.chute.cache.network_interfaces.len() {
        let iface = ctx.chute.cache.network_interfaces[index].clone();
        let Some(mode) = iface.mode.as_deref() else {
            continue;
        };
        let spec = ctx
            .chute
            .interfaces()
            .find(|(_, name, _)| *name == iface.name)
            .map(|(_, _, spec)| spec.clone());
        let hwmode = spec.as_ref().and_then(|s| s.requirements.hwmode.clone());
        let device = choose_device(
            &host,
            &ctx.reservations,
            iface.device.as_deref(),
            mode,
            hwmode.as_deref(),
            max_ap,
        )
        .ok_or_else(|| {
            UpdateError::ResourceExhausted(format!(
                "no wifi device can take {mode} interface {} of {chute}",
                iface.name
            ))
        })?;
        debug!("Interface {} of {chute} uses wifi device {device}", iface.name);
        ctx.reservations.devices.add(&device, &chute, "wifi", Some(mode));
        sections.push(wifi_iface(
            &chute,
            &iface,
            &device,
            spec.as_ref().and_then(|s| s.wireless.as_ref()),
        ));
        ctx.chute.cache.network_interfaces[index].device = Some(device);
    }
    ctx.sections.insert(ConfFile::Wireless, sections);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uci::HOST_OWNER;

    const HOST: &str = r"
wan:
  interface: eth0
lan:
  ipaddr: 192.168.1.1
  netmask: 255.255.255.0
wifi:
  - id: pci-wifi-0
    channel: 1
  - id: pci-wifi-1
    channel: 36
    hwmode: 11a
system:
  chuteSubnetPool: 192.168.128.0/17
";

    #[test]
    fn access_points_share_radios() {
        let host = HostConfig::from_yaml(HOST).unwrap();
        let mut r = Reservations::default();
        assert_eq!(choose_device(&host, &r, None, "ap", None, 2).as_deref(), Some("pci-wifi-0"));
        r.devices.add("pci-wifi-0", HOST_OWNER, "wifi", Some("ap"));
        assert_eq!(choose_device(&host, &r, None, "ap", None, 2).as_deref(), Some("pci-wifi-0"));
        r.devices.add("pci-wifi-0", "other", "wifi", Some("ap"));
        assert_eq!(choose_device(&host, &r, None, "ap", None, 2).as_deref(), Some("pci-wifi-1"));
        r.devices.add("pci-wifi-1", "other", "wifi", Some("ap"));
        r.devices.add("pci-wifi-1", "other", "wifi", Some("ap"));
        assert_eq!(choose_device(&host, &r, None, "ap", None, 2), None);
    }

    #[test]
    fn monitors_want_a_free_radio() {
        let host = HostConfig::from_yaml(HOST).unwrap();
        let mut r = Reservations::default();
        r.devices.add("pci-wifi-0", HOST_OWNER, "wifi", Some("ap"));
        assert_eq!(
            choose_device(&host, &r, None, "monitor", None, 8).as_deref(),
            Some("pci-wifi-1")
        );
        r.devices.add("pci-wifi-1", "sniffer", "wifi", Some("monitor"));
        assert_eq!(choose_device(&host, &r, None, "ap", Some("11a"), 8), None);
    }

    #[test]
    fn previous_radio_is_kept() {
        let host = HostConfig::from_yaml(HOST).unwrap();
        let r = Reservations::default();
        assert_eq!(
            choose_device(&host, &r, Some("pci-wifi-1"), "ap", None, 8).as_deref(),
            Some("pci-wifi-1")
        );
        /* unless it is gone from the host configuration */
        assert_eq!(
            choose_device(&host, &r, Some("pci-wifi-7"), "ap", None, 8).as_deref(),
            Some("pci-wifi-0")
        );
        assert_eq!(
            choose_device(&host, &r, None, "ap", Some("11a"), 8).as_deref(),
            Some("pci-wifi-1")
        );
    }
}
