// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Chute firewall zones and developer port forwarding rules.
//!
//! A developer rule forwards between the host and a chute interface. Its endpoints are tokens:
//! `@host.lan:<port>` is the host side, `<interface>:<port>` the chute side. Traffic from the
//! host side to the chute is destination-NATed; traffic from the chute to the host side is
//! source-NATed.

use chute::{Chute, FirewallRuleSpec, InterfaceType, NetKind};
use plan::PlanGraph;
use uci::UciSection;

use super::{Planner, plan_file};
use crate::context::{ConfFile, UpdateContext};
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::prio;
use crate::update::UpdateRequest;

/// The token naming the host side of a rule
pub const HOST_LAN: &str = "@host.lan";

pub struct FirewallPlanner;

impl Planner for FirewallPlanner {
    fn name(&self) -> &'static str {
        "firewall"
    }

    fn plan(&self, _request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError> {
        graph.add(prio::GET_FIREWALL, Op::GetFirewallConfig, vec![]);
        plan_file(graph, ConfFile::Firewall);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Host { port: String },
    Chute { interface: String, port: String },
}

fn bad_rule(rule: &FirewallRuleSpec, reason: &str) -> UpdateError {
    UpdateError::Validation(format!("firewall rule {}: {reason}", rule.name))
}

pub fn parse_endpoint(token: &str) -> Result<Endpoint, String> {
    let (address, port) = token
        .rsplit_once(':')
        .ok_or_else(|| format!("'{token}' has no port"))?;
    let valid_port = !port.is_empty() && port.chars().all(|c| c.is_ascii_digit() || c == '-');
    if !valid_port {
        return Err(format!("'{port}' is not a port"));
    }
    let port = port.to_string();
    match address {
        HOST_LAN => Ok(Endpoint::Host { port }),
        a if a.starts_with('@') => Err(format!("unknown host endpoint '{a}'")),
        "" => Err(format!("'{token}' names no interface")),
        interface => Ok(Endpoint::Chute {
            interface: interface.to_string(),
            port,
        }),
    }
}

/// A rule with its endpoints resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forward {
    /// Host side to chute
    Dnat {
        host_port: String,
        interface: String,
        chute_port: String,
    },
    /// Chute to host side
    Snat {
        interface: String,
        host_port: String,
    },
}

fn resolve(chute: &Chute, rule: &FirewallRuleSpec) -> Result<Forward, UpdateError> {
    let from = parse_endpoint(&rule.from).map_err(|e| bad_rule(rule, &e))?;
    let to = parse_endpoint(&rule.to).map_err(|e| bad_rule(rule, &e))?;
    let forward = match (from, to) {
        (Endpoint::Host { port: host_port }, Endpoint::Chute { interface, port }) => Forward::Dnat {
            host_port,
            interface,
            chute_port: port,
        },
        (Endpoint::Chute { interface, .. }, Endpoint::Host { port }) => Forward::Snat {
            interface,
            host_port: port,
        },
        (Endpoint::Host { .. }, Endpoint::Host { .. }) => {
            return Err(bad_rule(rule, "both ends are on the host"));
        }
        (Endpoint::Chute { .. }, Endpoint::Chute { .. }) => {
            return Err(bad_rule(rule, "neither end is on the host"));
        }
    };
    let interface = match &forward {
        Forward::Dnat { interface, .. } | Forward::Snat { interface, .. } => interface,
    };
    match chute.interfaces().find(|(_, name, _)| *name == interface.as_str()) {
        Some((_, _, spec)) if spec.kind != InterfaceType::Monitor => Ok(forward),
        Some(_) => Err(bad_rule(rule, &format!("{interface} is a monitor interface"))),
        None => Err(bad_rule(rule, &format!("no interface {interface}"))),
    }
}

/// Reject rules that cannot be installed
pub fn check_rules(chute: &Chute) -> Result<(), UpdateError> {
    for rule in &chute.firewall {
        if rule.kind != "redirect" {
            return Err(bad_rule(rule, &format!("unsupported type {}", rule.kind)));
        }
        resolve(chute, rule)?;
    }
    Ok(())
}

pub(crate) fn get_firewall_config(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    if !ctx.deploys() {
        ctx.sections.insert(ConfFile::Firewall, vec![]);
        return Ok(());
    }
    let chute = &ctx.chute;
    let mut sections = vec![];
    for iface in chute
        .cache
        .network_interfaces
        .iter()
        .filter(|i| i.kind != NetKind::Monitor)
    {
        let zone = iface.section_name(&chute.name);
        sections.push(
            UciSection::new("zone", Some(&zone))
                .option("name", &zone)
                .list("network", &zone)
                .option("input", "ACCEPT")
                .option("output", "ACCEPT")
                .option("forward", "ACCEPT"),
        );
        sections.push(
            UciSection::new("forwarding", Some(&format!("{zone}-wan")))
                .option("src", &zone)
                .option("dest", "wan"),
        );
    }

    let lan_ip = ctx.host()?.lan.ipaddr;
    for rule in &chute.firewall {
        let name = format!("{}-{}", chute.name, rule.name);
        let section = match resolve(chute, rule)? {
            Forward::Dnat {
                host_port,
                interface,
                chute_port,
            } => {
                let iface = chute.cache.interface(&interface).ok_or_else(|| {
                    bad_rule(rule, &format!("interface {interface} has no address"))
                })?;
                UciSection::new("redirect", Some(&name))
                    .option("src", "lan")
                    .option("src_dport", host_port)
                    .option("dest", iface.section_name(&chute.name))
                    .option_if("dest_ip", iface.internal_ipaddr)
                    .option("dest_port", chute_port)
                    .option_if("proto", rule.proto.as_ref())
                    .option("target", "DNAT")
            }
            Forward::Snat {
                interface,
                host_port,
            } => {
                let iface = chute.cache.interface(&interface).ok_or_else(|| {
                    bad_rule(rule, &format!("interface {interface} has no address"))
                })?;
                UciSection::new("redirect", Some(&name))
                    .option("src", iface.section_name(&chute.name))
                    .option("dest", "lan")
                    .option_if("src_ip", iface.internal_ipaddr)
                    .option("src_dip", lan_ip)
                    .option("dest_port", host_port)
                    .option_if("proto", rule.proto.as_ref())
                    .option("target", "SNAT")
            }
        };
        sections.push(section);
    }
    ctx.sections.insert(ConfFile::Firewall, sections);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WEB: &str = r"
name: web
services:
  main:
    image: nginx:latest
    type: image
    interfaces:
      wlan0:
        type: wifi-ap
        wireless:
          ssid: Web
      mon0:
        type: monitor
firewall:
  - name: http
    type: redirect
    from: '@host.lan:8080'
    to: 'wlan0:80'
";

    #[test]
    fn endpoints() {
        assert_eq!(
            parse_endpoint("@host.lan:8080"),
            Ok(Endpoint::Host {
                port: "8080".to_string()
            })
        );
        assert_eq!(
            parse_endpoint("wlan0:80"),
            Ok(Endpoint::Chute {
                interface: "wlan0".to_string(),
                port: "80".to_string()
            })
        );
        assert!(parse_endpoint("@host.wan:80").is_err());
        assert!(parse_endpoint("wlan0").is_err());
        assert!(parse_endpoint("wlan0:http").is_err());
    }

    #[test]
    fn rules_need_exactly_one_host_side() {
        let mut chute = Chute::from_yaml(WEB).unwrap();
        check_rules(&chute).expect("Should succeed");

        chute.firewall[0].to = "@host.lan:80".to_string();
        assert!(check_rules(&chute).unwrap_err().is_validation());

        chute.firewall[0].from = "wlan0:8080".to_string();
        chute.firewall[0].to = "wlan0:80".to_string();
        assert!(check_rules(&chute).is_err());

        chute.firewall[0].from = "@host.lan:8080".to_string();
        chute.firewall[0].to = "mon0:80".to_string();
        assert!(check_rules(&chute).is_err());

        chute.firewall[0].to = "eth9:80".to_string();
        assert!(check_rules(&chute).is_err());
    }

    #[test]
    fn direction_selects_nat() {
        let chute = Chute::from_yaml(WEB).unwrap();
        let forward = resolve(&chute, &chute.firewall[0]).unwrap();
        assert!(matches!(forward, Forward::Dnat { .. }));

        let mut rule = chute.firewall[0].clone();
        rule.from = "wlan0:5000".to_string();
        rule.to = "@host.lan:53".to_string();
        assert_eq!(
            resolve(&chute, &rule).unwrap(),
            Forward::Snat {
                interface: "wlan0".to_string(),
                host_port: "53".to_string()
            }
        );
    }
}
