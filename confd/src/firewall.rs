// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `zone`, `forwarding`, `redirect` and `rule` sections of the firewall file.
//!
//! Rules are inserted at the head of their chain, so the priority order of insertion is the
//! reverse of the evaluation order: zone policies end up below the established-traffic accepts,
//! which end up below forwardings and user rules.

use exec::Command;
use std::net::Ipv4Addr;

use crate::errors::ConfdError;
use crate::options::Options;
use crate::prio;
use crate::section::{Commands, ConfigSet, Env, SectionKey, SectionOps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Target {
    Accept,
    Reject,
    Drop,
}

/// One iptables rule, insertable and deletable
#[derive(Debug, Clone, PartialEq, Eq)]
struct IptRule {
    table: &'static str,
    chain: &'static str,
    spec: Vec<String>,
}

impl IptRule {
    fn new(table: &'static str, chain: &'static str) -> Self {
        Self {
            table,
            chain,
            spec: vec![],
        }
    }
    fn arg(mut self, flag: &str, value: impl ToString) -> Self {
        self.spec.push(flag.to_string());
        self.spec.push(value.to_string());
        self
    }
    fn arg_if<V: ToString>(self, flag: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.arg(flag, v),
            None => self,
        }
    }
    fn words(mut self, words: &[&str]) -> Self {
        self.spec.extend(words.iter().map(|w| (*w).to_string()));
        self
    }
    fn command(&self, op: &str) -> Command {
        let mut argv = vec!["iptables".to_string(), "-t".to_string(), self.table.to_string()];
        argv.push(op.to_string());
        argv.push(self.chain.to_string());
        argv.extend(self.spec.iter().cloned());
        Command::exec(argv)
    }
}

fn emit(rules: &[IptRule], apply: bool, priority: i32) -> Commands {
    rules
        .iter()
        .map(|r| {
            if apply {
                (priority, r.command("-I"))
            } else {
                (prio::DELETE_RULE, r.command("-D"))
            }
        })
        .collect()
}

fn zone_devices(env: &Env<'_>, key: &SectionKey, zone: &str) -> Result<Vec<String>, ConfdError> {
    let Some((_, found)) = env.all.zone(zone) else {
        return Err(ConfdError::MissingDependency {
            key: key.clone(),
            dependency: format!("zone '{zone}'"),
        });
    };
    found
        .networks
        .iter()
        .map(|n| {
            env.all.device_of(n).ok_or_else(|| ConfdError::MissingDependency {
                key: key.clone(),
                dependency: format!("interface '{n}'"),
            })
        })
        .collect()
}

fn zone_key(all: &ConfigSet, name: &str) -> SectionKey {
    all.zone(name)
        .map_or_else(|| SectionKey::new("firewall", "zone", name), |(k, _)| k.clone())
}

/// `tcpudp` expands to both, `all` to no protocol match
fn protocols(opts: &Options<'_>) -> Vec<String> {
    match opts.opt("proto").as_deref().unwrap_or("tcpudp") {
        "tcpudp" => vec!["tcp".to_string(), "udp".to_string()],
        "all" | "any" => vec![],
        other => other.split_whitespace().map(str::to_string).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub name: String,
    pub networks: Vec<String>,
    pub input: Target,
    pub output: Target,
    pub forward: Target,
    pub masq: bool,
}

impl Zone {
    fn rules(
        &self,
        key: &SectionKey,
        env: &Env<'_>,
    ) -> Result<(Vec<IptRule>, Vec<IptRule>), ConfdError> {
        let (mut policies, mut established) = (vec![], vec![]);
        for dev in zone_devices(env, key, &self.name)? {
            for (chain, flag, target) in [
                ("INPUT", "-i", self.input),
                ("FORWARD", "-i", self.forward),
                ("OUTPUT", "-o", self.output),
            ] {
                if target == Target::Accept {
                    continue;
                }
                policies.push(IptRule::new("filter", chain).arg(flag, &dev).arg("-j", target));
                established.push(
                    IptRule::new("filter", chain)
                        .arg(flag, &dev)
                        .words(&["-m", "conntrack", "--ctstate", "RELATED,ESTABLISHED"])
                        .arg("-j", "ACCEPT"),
                );
            }
            if self.masq {
                policies.push(
                    IptRule::new("nat", "POSTROUTING")
                        .arg("-o", &dev)
                        .arg("-j", "MASQUERADE"),
                );
            }
        }
        Ok((policies, established))
    }

    fn commands(
        &self,
        key: &SectionKey,
        env: &Env<'_>,
        apply: bool,
    ) -> Result<Commands, ConfdError> {
        let (policies, established) = self.rules(key, env)?;
        let mut cmds = emit(&policies, apply, prio::ZONE_POLICY);
        cmds.extend(emit(&established, apply, prio::ZONE_ESTABLISHED));
        Ok(cmds)
    }
}

impl SectionOps for Zone {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            name: opts.opt("name").unwrap_or_else(|| opts.section_name().to_string()),
            networks: opts.list("network"),
            input: opts.parse_or("input", Target::Accept)?,
            output: opts.parse_or("output", Target::Accept)?,
            forward: opts.parse_or("forward", Target::Accept)?,
            masq: opts.bool("masq", false)?,
        })
    }
    fn dependencies(&self, _key: &SectionKey, _all: &ConfigSet) -> Vec<SectionKey> {
        self.networks.iter().map(|n| SectionKey::network(n.as_str())).collect()
    }
    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        self.commands(key, env, true)
    }
    fn revert(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        self.commands(key, env, false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forwarding {
    pub src: String,
    pub dest: String,
}

impl Forwarding {
    fn commands(
        &self,
        key: &SectionKey,
        env: &Env<'_>,
        apply: bool,
    ) -> Result<Commands, ConfdError> {
        let mut rules = vec![];
        for src in zone_devices(env, key, &self.src)? {
            for dest in zone_devices(env, key, &self.dest)? {
                rules.push(
                    IptRule::new("filter", "FORWARD")
                        .arg("-i", &src)
                        .arg("-o", &dest)
                        .arg("-j", "ACCEPT"),
                );
            }
        }
        Ok(emit(&rules, apply, prio::FORWARDING))
    }
}

impl SectionOps for Forwarding {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            src: opts.required("src")?,
            dest: opts.required("dest")?,
        })
    }
    fn dependencies(&self, _key: &SectionKey, all: &ConfigSet) -> Vec<SectionKey> {
        vec![zone_key(all, &self.src), zone_key(all, &self.dest)]
    }
    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        self.commands(key, env, true)
    }
    fn revert(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        self.commands(key, env, false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum NatTarget {
    Dnat,
    Snat,
}

/// Port forwarding. DNAT rewrites the destination of traffic entering from `src`; without a
/// `dest_ip` it is redirected to a local port. SNAT rewrites the source of traffic leaving
/// through `dest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub src: Option<String>,
    pub dest: Option<String>,
    pub protocols: Vec<String>,
    pub src_ip: Option<Ipv4Addr>,
    pub src_dip: Option<Ipv4Addr>,
    pub src_dport: Option<String>,
    pub dest_ip: Option<Ipv4Addr>,
    pub dest_port: Option<String>,
    pub target: NatTarget,
}

impl Redirect {
    fn rules(&self, key: &SectionKey, env: &Env<'_>) -> Result<Vec<IptRule>, ConfdError> {
        let invalid = |reason: &str| ConfdError::Invalid {
            key: key.clone(),
            reason: reason.to_string(),
        };
        let protocols: Vec<Option<&str>> = if self.protocols.is_empty() {
            vec![None]
        } else {
            self.protocols.iter().map(|p| Some(p.as_str())).collect()
        };
        let mut rules = vec![];
        match self.target {
            NatTarget::Dnat => {
                let src = self.src.as_deref().ok_or_else(|| invalid("DNAT needs a source zone"))?;
                for dev in zone_devices(env, key, src)? {
                    for proto in &protocols {
                        let base = IptRule::new("nat", "PREROUTING")
                            .arg("-i", &dev)
                            .arg_if("-p", *proto)
                            .arg_if("-s", self.src_ip)
                            .arg_if("-d", self.src_dip)
                            .arg_if("--dport", self.src_dport.as_ref());
                        match self.dest_ip {
                            Some(ip) => {
                                let to = match &self.dest_port {
                                    Some(port) => format!("{ip}:{port}"),
                                    None => ip.to_string(),
                                };
                                rules.push(base.arg("-j", "DNAT").arg("--to-destination", to));
                                let dport = self.dest_port.as_ref().or(self.src_dport.as_ref());
                                rules.push(
                                    IptRule::new("filter", "FORWARD")
                                        .arg("-i", &dev)
                                        .arg_if("-p", *proto)
                                        .arg("-d", ip)
                                        .arg_if("--dport", dport)
                                        .arg("-j", "ACCEPT"),
                                );
                            }
                            None => {
                                let port = self
                                    .dest_port
                                    .as_ref()
                                    .ok_or_else(|| invalid("REDIRECT needs a dest_port"))?;
                                rules.push(base.arg("-j", "REDIRECT").arg("--to-ports", port));
                            }
                        }
                    }
                }
            }
            NatTarget::Snat => {
                let dest = self
                    .dest
                    .as_deref()
                    .ok_or_else(|| invalid("SNAT needs a destination zone"))?;
                let to_ip = self.src_dip.ok_or_else(|| invalid("SNAT needs a src_dip"))?;
                let to = match &self.src_dport {
                    Some(port) => format!("{to_ip}:{port}"),
                    None => to_ip.to_string(),
                };
                for dev in zone_devices(env, key, dest)? {
                    for proto in &protocols {
                        rules.push(
                            IptRule::new("nat", "POSTROUTING")
                                .arg("-o", &dev)
                                .arg_if("-p", *proto)
                                .arg_if("-s", self.src_ip)
                                .arg_if("-d", self.dest_ip)
                                .arg_if("--dport", self.dest_port.as_ref())
                                .arg("-j", "SNAT")
                                .arg("--to-source", &to),
                        );
                    }
                }
            }
        }
        Ok(rules)
    }
}

impl SectionOps for Redirect {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            src: opts.opt("src"),
            dest: opts.opt("dest"),
            protocols: protocols(opts),
            src_ip: opts.parse("src_ip")?,
            src_dip: opts.parse("src_dip")?,
            src_dport: opts.opt("src_dport"),
            dest_ip: opts.parse("dest_ip")?,
            dest_port: opts.opt("dest_port"),
            target: opts.parse_or("target", NatTarget::Dnat)?,
        })
    }
    fn dependencies(&self, _key: &SectionKey, all: &ConfigSet) -> Vec<SectionKey> {
        [&self.src, &self.dest]
            .into_iter()
            .flatten()
            .map(|z| zone_key(all, z))
            .collect()
    }
    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(emit(&self.rules(key, env)?, true, prio::USER_RULE))
    }
    fn revert(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(emit(&self.rules(key, env)?, false, prio::USER_RULE))
    }
}

/// A filter rule: on INPUT without a destination zone, on FORWARD with one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub src: Option<String>,
    pub dest: Option<String>,
    pub protocols: Vec<String>,
    pub src_ip: Option<String>,
    pub dest_ip: Option<String>,
    pub src_port: Option<String>,
    pub dest_port: Option<String>,
    pub target: Target,
}

impl Rule {
    fn rules(&self, key: &SectionKey, env: &Env<'_>) -> Result<Vec<IptRule>, ConfdError> {
        let devices = |zone: Option<&str>| -> Result<Vec<Option<String>>, ConfdError> {
            Ok(match zone {
                Some(zone) if zone != "*" => {
                    zone_devices(env, key, zone)?.into_iter().map(Some).collect()
                }
                _ => vec![None],
            })
        };
        let src_devs = devices(self.src.as_deref())?;
        let dest_devs = devices(self.dest.as_deref())?;
        let chain = if self.dest.is_some() { "FORWARD" } else { "INPUT" };
        let protocols: Vec<Option<&str>> = if self.protocols.is_empty() {
            vec![None]
        } else {
            self.protocols.iter().map(|p| Some(p.as_str())).collect()
        };
        let mut rules = vec![];
        for src in &src_devs {
            for dest in &dest_devs {
                for proto in &protocols {
                    let ports = proto.is_some();
                    rules.push(
                        IptRule::new("filter", chain)
                            .arg_if("-i", src.as_ref())
                            .arg_if("-o", dest.as_ref())
                            .arg_if("-p", *proto)
                            .arg_if("-s", self.src_ip.as_ref())
                            .arg_if("-d", self.dest_ip.as_ref())
                            .arg_if("--sport", self.src_port.as_ref().filter(|_| ports))
                            .arg_if("--dport", self.dest_port.as_ref().filter(|_| ports))
                            .arg("-j", self.target),
                    );
                }
            }
        }
        Ok(rules)
    }
}

impl SectionOps for Rule {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            src: opts.opt("src"),
            dest: opts.opt("dest"),
            protocols: protocols(opts),
            src_ip: opts.opt("src_ip"),
            dest_ip: opts.opt("dest_ip"),
            src_port: opts.opt("src_port"),
            dest_port: opts.opt("dest_port"),
            target: opts.parse_or("target", Target::Accept)?,
        })
    }
    fn dependencies(&self, _key: &SectionKey, all: &ConfigSet) -> Vec<SectionKey> {
        [&self.src, &self.dest]
            .into_iter()
            .flatten()
            .filter(|z| *z != "*")
            .map(|z| zone_key(all, z))
            .collect()
    }
    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(emit(&self.rules(key, env)?, true, prio::USER_RULE))
    }
    fn revert(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(emit(&self.rules(key, env)?, false, prio::USER_RULE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn load() -> ConfigSet {
        let mut set = ConfigSet::new();
        set.add_file(
            "network",
            &uci::parse(
                "config interface 'wan'\n\toption ifname 'eth0'\n\toption proto 'dhcp'\n\nconfig interface 'hello-wlan0'\n\toption ifname 'vwlan0.0000'\n\toption proto 'static'\n\toption ipaddr '192.168.128.1/24'\n",
            )
            .unwrap(),
        );
        let errors = set.add_file(
            "firewall",
            &uci::parse(
                "config zone\n\toption name 'wan'\n\tlist network 'wan'\n\toption input 'REJECT'\n\toption masq '1'\n\nconfig zone 'hello-wlan0'\n\tlist network 'hello-wlan0'\n\nconfig forwarding\n\toption src 'hello-wlan0'\n\toption dest 'wan'\n\nconfig redirect 'web'\n\toption src 'wan'\n\toption src_dport '8080'\n\toption dest 'hello-wlan0'\n\toption dest_ip '192.168.128.2'\n\toption dest_port '80'\n\toption proto 'tcp'\n",
            )
            .unwrap(),
        );
        assert!(errors.is_empty(), "{errors:?}");
        set
    }

    fn lines(cmds: &Commands) -> Vec<String> {
        cmds.iter().map(|(_, c)| c.to_string()).collect()
    }

    #[test]
    fn zone_policies_and_masquerade() {
        let set = load();
        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        let zone = set.get(&SectionKey::new("firewall", "zone", "@zone[0]")).unwrap();
        assert_eq!(
            lines(&zone.apply(&env).unwrap()),
            vec![
                "iptables -t filter -I INPUT -i eth0 -j REJECT",
                "iptables -t nat -I POSTROUTING -o eth0 -j MASQUERADE",
                "iptables -t filter -I INPUT -i eth0 -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT",
            ]
        );
        assert_eq!(
            lines(&zone.revert(&env).unwrap())[0],
            "iptables -t filter -D INPUT -i eth0 -j REJECT"
        );
    }

    #[test]
    fn forwarding_resolves_zone_names() {
        let set = load();
        let fwd = set.get(&SectionKey::new("firewall", "forwarding", "@forwarding[0]")).unwrap();
        assert_eq!(
            fwd.dependencies(&set),
            vec![
                SectionKey::new("firewall", "zone", "hello-wlan0"),
                SectionKey::new("firewall", "zone", "@zone[0]"),
            ]
        );
        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        assert_eq!(
            lines(&fwd.apply(&env).unwrap()),
            vec!["iptables -t filter -I FORWARD -i vwlan0.0000 -o eth0 -j ACCEPT"]
        );
    }

    #[test]
    fn dnat_redirect() {
        let set = load();
        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        let redirect = set.get(&SectionKey::new("firewall", "redirect", "web")).unwrap();
        assert_eq!(
            lines(&redirect.apply(&env).unwrap()),
            vec![
                "iptables -t nat -I PREROUTING -i eth0 -p tcp --dport 8080 -j DNAT --to-destination 192.168.128.2:80",
                "iptables -t filter -I FORWARD -i eth0 -p tcp -d 192.168.128.2 --dport 80 -j ACCEPT",
            ]
        );
    }

    #[test]
    fn snat_and_local_redirect() {
        let mut set = load();
        set.add_file(
            "firewall",
            &uci::parse(
                "config redirect 'snat'\n\toption dest 'wan'\n\toption target 'SNAT'\n\toption src_ip '192.168.128.2'\n\toption src_dip '10.0.0.5'\n\toption proto 'udp'\n\nconfig redirect 'local'\n\toption src 'hello-wlan0'\n\toption src_dport '53'\n\toption dest_port '5353'\n\toption proto 'udp'\n",
            )
            .unwrap(),
        );
        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        let snat = set.get(&SectionKey::new("firewall", "redirect", "snat")).unwrap();
        assert_eq!(
            lines(&snat.apply(&env).unwrap()),
            vec![
                "iptables -t nat -I POSTROUTING -o eth0 -p udp -s 192.168.128.2 -j SNAT --to-source 10.0.0.5"
            ]
        );
        let local = set.get(&SectionKey::new("firewall", "redirect", "local")).unwrap();
        assert_eq!(
            lines(&local.apply(&env).unwrap()),
            vec![
                "iptables -t nat -I PREROUTING -i vwlan0.0000 -p udp --dport 53 -j REDIRECT --to-ports 5353"
            ]
        );
    }

    #[test]
    fn input_rule() {
        let mut set = load();
        set.add_file(
            "firewall",
            &uci::parse(
                "config rule 'ssh'\n\toption src 'wan'\n\toption proto 'tcp'\n\toption dest_port '22'\n\toption target 'ACCEPT'\n",
            )
            .unwrap(),
        );
        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        let rule = set.get(&SectionKey::new("firewall", "rule", "ssh")).unwrap();
        assert_eq!(
            lines(&rule.apply(&env).unwrap()),
            vec!["iptables -t filter -I INPUT -i eth0 -p tcp --dport 22 -j ACCEPT"]
        );
    }
}
