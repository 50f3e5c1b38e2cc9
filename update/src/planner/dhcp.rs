// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! DHCP and DNS for chute interfaces with a `dhcp` block

use chute::NetworkInterface;
use plan::PlanGraph;
use uci::UciSection;

use super::{Planner, plan_file};
use crate::context::{ConfFile, UpdateContext};
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::prio;
use crate::update::UpdateRequest;

/// Resolvers handed to clients when the chute does not name any and dnsmasq does not cache
const FALLBACK_DNS: [&str; 2] = ["8.8.8.8", "8.8.4.4"];

pub struct DhcpPlanner;

impl Planner for DhcpPlanner {
    fn name(&self) -> &'static str {
        "dhcp"
    }

    fn plan(&self, _request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError> {
        graph.add(prio::GET_DHCP, Op::GetDhcpConfig, vec![]);
        plan_file(graph, ConfFile::Dhcp);
        /* dnsmasq answers DNS through firewall redirects */
        graph.add(
            ConfFile::Firewall.reload_priority(),
            Op::Reload(ConfFile::Firewall),
            vec![],
        );
        Ok(())
    }
}

/// The `dnsmasq` and `dhcp` sections serving one interface
#[must_use]
pub fn dhcp_sections(chute: &str, iface: &NetworkInterface) -> Vec<UciSection> {
    let Some(dhcp) = &iface.dhcp else {
        return vec![];
    };
    let name = iface.section_name(chute);
    let mut dnsmasq = UciSection::new("dnsmasq", Some(&name)).list("interface", &name);
    if dhcp.cache {
        for server in &iface.dns {
            dnsmasq = dnsmasq.list("server", server);
        }
    } else {
        dnsmasq = dnsmasq.option("port", 0);
    }
    let mut served = UciSection::new("dhcp", Some(&name))
        .option("interface", &name)
        .option("instance", &name)
        .option("start", dhcp.start)
        .option("limit", dhcp.limit)
        .option("leasetime", &dhcp.leasetime)
        .option_if("relay", dhcp.relay.as_ref());
    if !dhcp.cache {
        let servers = if iface.dns.is_empty() {
            FALLBACK_DNS.join(",")
        } else {
            iface.dns.join(",")
        };
        served = served.list("dhcp_option", format!("6,{servers}"));
    }
    vec![dnsmasq, served]
}

pub(crate) fn get_dhcp_config(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    let sections = if ctx.deploys() {
        ctx.chute
            .cache
            .network_interfaces
            .iter()
            .flat_map(|iface| dhcp_sections(&ctx.chute.name, iface))
            .collect()
    } else {
        vec![]
    };
    ctx.sections.insert(ConfFile::Dhcp, sections);
    Ok(())
}
