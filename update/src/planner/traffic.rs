// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Egress shaping of chute interfaces declaring `traffic`

use chute::NetworkInterface;
use plan::PlanGraph;
use uci::UciSection;

use super::{Planner, plan_file};
use crate::context::{ConfFile, UpdateContext};
use crate::errors::UpdateError;
use crate::ops::Op;
use crate::prio;
use crate::update::UpdateRequest;

pub struct TrafficPlanner;

impl Planner for TrafficPlanner {
    fn name(&self) -> &'static str {
        "traffic"
    }

    fn plan(&self, _request: &UpdateRequest, graph: &mut PlanGraph<Op>) -> Result<(), UpdateError> {
        graph.add(prio::GET_TRAFFIC, Op::GetTrafficConfig, vec![]);
        plan_file(graph, ConfFile::Qos);
        Ok(())
    }
}

/// One class group with a single default class per shaped interface
#[must_use]
pub fn qos_sections(chute: &str, iface: &NetworkInterface) -> Vec<UciSection> {
    let Some(traffic) = &iface.traffic else {
        return vec![];
    };
    let name = iface.section_name(chute);
    let class = format!("{name}-default");
    vec![
        UciSection::new("interface", Some(&name))
            .option("classgroup", &name)
            .option("upload", traffic.upload),
        UciSection::new("classgroup", Some(&name))
            .list("classes", &class)
            .option("default", &class),
        UciSection::new("class", Some(&class)).option_if("priority", traffic.priority),
    ]
}

pub(crate) fn get_traffic_config(ctx: &mut UpdateContext) -> Result<(), UpdateError> {
    let sections = if ctx.deploys() {
        ctx.chute
            .cache
            .network_interfaces
            .iter()
            .flat_map(|iface| qos_sections(&ctx.chute.name, iface))
            .collect()
    } else {
        vec![]
    };
    ctx.sections.insert(ConfFile::Qos, sections);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chute::{NetKind, TrafficSpec};
    use pretty_assertions::assert_eq;

    #[test]
    fn shaped_interface() {
        let mut iface = NetworkInterface::new(
            "wlan0",
            "main",
            NetKind::Wifi,
            "wlan0",
            "vwlan0.0000",
            0,
        );
        assert!(qos_sections("hello", &iface).is_empty());

        iface.traffic = Some(TrafficSpec {
            upload: 5000,
            priority: Some(2),
        });
        let sections = qos_sections("hello", &iface);
        assert_eq!(sections[0].name.as_deref(), Some("hello-wlan0"));
        assert_eq!(sections[0].get("upload"), Some("5000"));
        assert_eq!(sections[1].get("default"), Some("hello-wlan0-default"));
        assert_eq!(sections[2].get("priority"), Some("2"));
    }
}
