// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Egress traffic shaping with an HFSC tree.
//!
//! A `qos interface` section names the network to shape, its upload rate and a
//! `classgroup`. The classgroup lists the `class` sections that become HFSC leaves, and
//! `classify` sections steer traffic into them with `tc` basic ematch filters. Only the
//! interface section emits commands; the others are data it reads.

use ipnet::Ipv4Net;
use tracing::debug;

use crate::errors::ConfdError;
use crate::options::Options;
use crate::prio;
use crate::section::{Commands, ConfigSet, Env, SectionBody, SectionKey, SectionOps};

/// Upload rate assumed when an interface does not declare one, in kbit/s
pub const DEFAULT_UPLOAD: u32 = 100_000;

/// First class id of the leaves, `1:1` being the root class
const FIRST_CLASS_ID: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosInterface {
    pub network: String,
    pub enabled: bool,
    pub classgroup: String,
    pub upload: u32, /* kbit/s */
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosClassgroup {
    pub classes: Vec<String>,
    pub default: Option<String>,
}

/// Rates are percentages of the interface upload rate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QosClass {
    pub priority: Option<u32>,
    pub avgrate: Option<u32>,
    pub packetsize: Option<u32>,  /* bytes */
    pub packetdelay: Option<u32>, /* ms */
    pub limitrate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosClassify {
    pub target: String,
    pub proto: Option<String>,
    pub srchost: Option<Ipv4Net>,
    pub dsthost: Option<Ipv4Net>,
    pub ports: Vec<u16>,
    pub dscp: Option<u8>,
}

/// Service curves of one HFSC leaf, in kbit/s and ms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HfscParams {
    pub has_rt: bool,
    pub has_ls: bool,
    pub has_ul: bool,
    pub rt_m1: u32,
    pub rt_d: u32,
    pub rt_m2: u32,
    pub ls_m2: u32,
    pub ul_m2: u32,
}

impl HfscParams {
    fn tc_args(&self) -> Vec<String> {
        let mut args = vec![];
        if self.has_rt {
            args.push("rt".to_string());
            if self.rt_m1 > 0 {
                args.extend(["m1".to_string(), format!("{}kbit", self.rt_m1)]);
                args.extend(["d".to_string(), format!("{}ms", self.rt_d)]);
            }
            args.extend(["m2".to_string(), format!("{}kbit", self.rt_m2)]);
        }
        if self.has_ls {
            args.extend(["ls".to_string(), "m2".to_string(), format!("{}kbit", self.ls_m2)]);
        }
        if self.has_ul {
            args.extend(["ul".to_string(), "m2".to_string(), format!("{}kbit", self.ul_m2)]);
        }
        args
    }
}

fn percent_of(rate: u32, percent: u32) -> u32 {
    u32::try_from(u64::from(rate) * u64::from(percent.min(100)) / 100).unwrap_or(rate)
}

/// Compute the service curves of a set of classes sharing `upload` kbit/s.
///
/// Classes with an `avgrate` get that share of the link. The remainder is divided among the
/// other classes in proportion to their `priority` (1 when unset). A class with both a
/// `packetsize` and a `packetdelay` gets a real-time curve guaranteeing a packet of that size
/// within that delay; real-time rates are scaled down together when they would exceed the
/// link. `limitrate` caps a class with an upper-limit curve.
#[must_use]
pub fn compute_hfsc_params(classes: &[&QosClass], upload: u32) -> Vec<HfscParams> {
    let explicit: u32 = classes.iter().filter_map(|c| c.avgrate).map(|p| p.min(100)).sum();
    let remainder = 100u32.saturating_sub(explicit);
    let weight = |c: &QosClass| u64::from(c.priority.unwrap_or(1).max(1));
    let weights: u64 = classes.iter().filter(|c| c.avgrate.is_none()).map(|c| weight(c)).sum();

    let mut params: Vec<HfscParams> = classes
        .iter()
        .map(|class| {
            let share = match class.avgrate {
                Some(avg) => avg.min(100),
                None if weights > 0 => {
                    u32::try_from(u64::from(remainder) * weight(class) / weights).unwrap_or(0)
                }
                None => 0,
            };
            let avg = percent_of(upload, share);
            let mut p = HfscParams {
                has_ls: avg > 0,
                ls_m2: avg,
                ..HfscParams::default()
            };
            if let (Some(size), Some(delay)) = (class.packetsize, class.packetdelay)
                && delay > 0
            {
                p.has_rt = true;
                // bits per ms is kbit/s
                p.rt_m1 = u32::try_from(u64::from(size) * 8 / u64::from(delay))
                    .unwrap_or(u32::MAX);
                p.rt_d = delay;
                p.rt_m2 = avg;
            }
            if let Some(limit) = class.limitrate {
                p.has_ul = true;
                p.ul_m2 = percent_of(upload, limit);
            }
            p
        })
        .collect();

    let rt_total: u64 = params.iter().filter(|p| p.has_rt).map(|p| u64::from(p.rt_m2)).sum();
    if rt_total > u64::from(upload) {
        for p in params.iter_mut().filter(|p| p.has_rt) {
            p.rt_m2 = u32::try_from(u64::from(p.rt_m2) * u64::from(upload) / rt_total).unwrap_or(0);
        }
    }
    params
}

/// argv of `tc <object> add dev <dev> <words>`
fn tc_add(object: &str, dev: &str, words: &str) -> Vec<String> {
    ["tc", object, "add", "dev", dev]
        .into_iter()
        .chain(words.split_whitespace())
        .map(str::to_string)
        .collect()
}

fn protocol_number(proto: &str) -> Option<u8> {
    match proto {
        "icmp" => Some(1),
        "tcp" => Some(6),
        "udp" => Some(17),
        other => other.parse().ok(),
    }
}

impl QosClassify {
    /// The `tc` basic ematch expression selecting this traffic
    fn ematch(&self, key: &SectionKey) -> Result<String, ConfdError> {
        let mut terms = vec![];
        if let Some(proto) = &self.proto {
            let number = protocol_number(proto).ok_or_else(|| ConfdError::Invalid {
                key: key.clone(),
                reason: format!("unknown protocol '{proto}'"),
            })?;
            terms.push(format!("cmp(u8 at 9 layer network eq {number})"));
        }
        for (net, offset) in [(self.srchost, 12), (self.dsthost, 16)] {
            if let Some(net) = net {
                terms.push(format!(
                    "u32(u32 0x{:08x} 0x{:08x} at {offset})",
                    u32::from(net.network()),
                    u32::from(net.netmask())
                ));
            }
        }
        if !self.ports.is_empty() {
            let ports: Vec<String> = self
                .ports
                .iter()
                .map(|p| format!("cmp(u16 at 2 layer transport eq {p})"))
                .collect();
            if ports.len() == 1 {
                terms.extend(ports);
            } else {
                terms.push(format!("({})", ports.join(" or ")));
            }
        }
        if let Some(dscp) = self.dscp {
            terms.push(format!("cmp(u8 at 1 layer network mask 0xfc eq {})", u32::from(dscp) << 2));
        }
        if terms.is_empty() {
            return Err(ConfdError::Invalid {
                key: key.clone(),
                reason: "classify matches nothing".to_string(),
            });
        }
        Ok(terms.join(" and "))
    }
}

fn qos_key(kind: &str, name: &str) -> SectionKey {
    SectionKey::new("qos", kind, name)
}

impl QosInterface {
    fn classgroup<'a>(&self, all: &'a ConfigSet) -> Option<&'a QosClassgroup> {
        match all.get(&qos_key("classgroup", &self.classgroup)).map(|s| &s.body) {
            Some(SectionBody::QosClassgroup(group)) => Some(group),
            _ => None,
        }
    }

    fn classifies<'a>(
        all: &'a ConfigSet,
        classes: &'a [String],
    ) -> impl Iterator<Item = (&'a SectionKey, &'a QosClassify)> {
        all.of_kind("qos", "classify").filter_map(move |s| match &s.body {
            SectionBody::QosClassify(c) if classes.contains(&c.target) => Some((&s.key, c)),
            _ => None,
        })
    }
}

impl SectionOps for QosInterface {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            network: opts.opt("network").unwrap_or_else(|| opts.section_name().to_string()),
            enabled: opts.bool("enabled", true)?,
            classgroup: opts.required("classgroup")?,
            upload: opts.parse_or("upload", DEFAULT_UPLOAD)?,
        })
    }

    fn dependencies(&self, _key: &SectionKey, all: &ConfigSet) -> Vec<SectionKey> {
        let mut deps = vec![
            SectionKey::network(&self.network),
            qos_key("classgroup", &self.classgroup),
        ];
        if let Some(group) = self.classgroup(all) {
            deps.extend(group.classes.iter().map(|c| qos_key("class", c)));
            deps.extend(Self::classifies(all, &group.classes).map(|(k, _)| k.clone()));
        }
        deps
    }

    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        if !self.enabled {
            debug!("Traffic shaping disabled on {}", self.network);
            return Ok(vec![]);
        }
        let missing = |dependency: String| ConfdError::MissingDependency {
            key: key.clone(),
            dependency,
        };
        let dev = env
            .all
            .device_of(&self.network)
            .ok_or_else(|| missing(format!("interface '{}'", self.network)))?;
        let group = self
            .classgroup(env.all)
            .ok_or_else(|| missing(format!("classgroup '{}'", self.classgroup)))?;
        let classes = group
            .classes
            .iter()
            .map(|name| match env.all.get(&qos_key("class", name)).map(|s| &s.body) {
                Some(SectionBody::QosClass(class)) => Ok(class),
                _ => Err(missing(format!("class '{name}'"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let class_id = |name: &str| {
            group
                .classes
                .iter()
                .position(|c| c == name)
                .map(|i| FIRST_CLASS_ID + i)
        };
        let default_id = group
            .default
            .as_deref()
            .and_then(class_id)
            .unwrap_or(FIRST_CLASS_ID);

        let rate = format!("{}kbit", self.upload);
        let root = tc_add("qdisc", &dev, &format!("root handle 1: hfsc default {default_id}"));
        let link = format!("parent 1: classid 1:1 hfsc sc rate {rate} ul rate {rate}");
        let mut cmds: Commands = vec![
            (prio::ADD_QDISC, exec::Command::exec(root)),
            (prio::ADD_QDISC, exec::Command::exec(tc_add("class", &dev, &link))),
        ];
        for (i, params) in compute_hfsc_params(&classes, self.upload).iter().enumerate() {
            let id = FIRST_CLASS_ID + i;
            let mut class = tc_add("class", &dev, &format!("parent 1:1 classid 1:{id} hfsc"));
            class.extend(params.tc_args());
            let leaf = tc_add("qdisc", &dev, &format!("parent 1:{id} handle {id}: fq_codel"));
            cmds.push((prio::ADD_QDISC, exec::Command::exec(class)));
            cmds.push((prio::ADD_QDISC, exec::Command::exec(leaf)));
        }
        for (n, (ckey, classify)) in Self::classifies(env.all, &group.classes).enumerate() {
            let Some(id) = class_id(&classify.target) else {
                continue;
            };
            let head = format!("parent 1: protocol ip prio {} basic match", n + 1);
            let mut filter = tc_add("filter", &dev, &head);
            filter.extend([classify.ematch(ckey)?, "flowid".to_string(), format!("1:{id}")]);
            cmds.push((prio::ADD_QDISC, exec::Command::exec(filter)));
        }
        Ok(cmds)
    }

    fn revert(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        if !self.enabled {
            return Ok(vec![]);
        }
        let dev = env.all.device_of(&self.network).ok_or_else(|| ConfdError::MissingDependency {
            key: key.clone(),
            dependency: format!("interface '{}'", self.network),
        })?;
        Ok(vec![(
            prio::DELETE_QDISC,
            cmd!("tc", "qdisc", "del", "dev", dev, "root").ignore_failure(),
        )])
    }
}

impl SectionOps for QosClassgroup {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            classes: opts.list("classes"),
            default: opts.opt("default"),
        })
    }
    fn apply(&self, _key: &SectionKey, _env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
    fn revert(&self, _key: &SectionKey, _env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
}

impl SectionOps for QosClass {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            priority: opts.parse("priority")?,
            avgrate: opts.parse("avgrate")?,
            packetsize: opts.parse("packetsize")?,
            packetdelay: opts.parse("packetdelay")?,
            limitrate: opts.parse("limitrate")?,
        })
    }
    fn apply(&self, _key: &SectionKey, _env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
    fn revert(&self, _key: &SectionKey, _env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
}

impl SectionOps for QosClassify {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        let ports = opts
            .list("ports")
            .iter()
            .flat_map(|p| p.split(','))
            .map(|p| p.trim().parse().map_err(|_| opts.bad_value("ports", p)))
            .collect::<Result<_, _>>()?;
        Ok(Self {
            target: opts.required("target")?,
            proto: opts.opt("proto"),
            srchost: opts.parse("srchost")?,
            dsthost: opts.parse("dsthost")?,
            ports,
            dscp: opts.parse("dscp")?,
        })
    }
    fn apply(&self, _key: &SectionKey, _env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
    fn revert(&self, _key: &SectionKey, _env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
}
