// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `dnsmasq` and `dhcp` sections of the dhcp file.
//!
//! Unlike OpenWrt, which runs a single dnsmasq for every interface, each served interface gets
//! its own dnsmasq instance with its own configuration, pid and lease files.

use exec::{Command, TimeoutClass};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::builder::{ConfigBuilder, Render};
use crate::errors::ConfdError;
use crate::options::Options;
use crate::prio;
use crate::section::{Commands, ConfigSet, Env, SectionBody, SectionKey, SectionOps};

/// DHCP service of one network interface. Served by a [`Dnsmasq`] instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dhcp {
    pub interface: String,
    pub start: u32,
    pub limit: u32,
    pub leasetime: String,
    pub ignore: bool,
    /// Name of the dnsmasq section serving this interface
    pub instance: Option<String>,
    pub dhcp_options: Vec<String>,
    /// Relay to this server instead of serving addresses
    pub relay: Option<Ipv4Addr>,
}

impl SectionOps for Dhcp {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            interface: opts.required("interface")?,
            start: opts.parse_or("start", 100)?,
            limit: opts.parse_or("limit", 150)?,
            leasetime: opts.opt("leasetime").unwrap_or_else(|| "12h".to_string()),
            ignore: opts.bool("ignore", false)?,
            instance: opts.opt("instance"),
            dhcp_options: opts.list("dhcp_option"),
            relay: opts.parse("relay")?,
        })
    }
    fn dependencies(&self, _key: &SectionKey, _all: &ConfigSet) -> Vec<SectionKey> {
        vec![SectionKey::network(&self.interface)]
    }
    fn apply(&self, _key: &SectionKey, _env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
    fn revert(&self, _key: &SectionKey, _env: &Env<'_>) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
    fn can_update(&self, _old: &Self) -> bool {
        true
    }
    fn update_revert(
        &self,
        _old: &Self,
        _key: &SectionKey,
        _env: &Env<'_>,
    ) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
    fn update_apply(
        &self,
        _old: &Self,
        _key: &SectionKey,
        _env: &Env<'_>,
    ) -> Result<Commands, ConfdError> {
        Ok(vec![])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnsmasq {
    /// Interfaces served; empty means every interface with a `dhcp` section
    pub interfaces: Vec<String>,
    pub domain: Option<String>,
    pub servers: Vec<String>,
    pub noresolv: bool,
    /// DNS port; 0 disables the DNS cache
    pub port: Option<u16>,
}

/// The rendered configuration of one dnsmasq instance
#[derive(Debug)]
pub struct DnsmasqConfig<'a> {
    pub dnsmasq: &'a Dnsmasq,
    pub dhcp: &'a Dhcp,
    pub device: String,
    pub address: Ipv4Net,
    pub leasefile: PathBuf,
}

/// First and last address handed out, within the interface subnet
fn dhcp_range(address: Ipv4Net, start: u32, limit: u32) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let network = u32::from(address.network());
    let broadcast = u32::from(address.broadcast());
    let first = network.checked_add(start)?;
    if first >= broadcast || limit == 0 {
        return None;
    }
    let last = first.saturating_add(limit - 1).min(broadcast - 1);
    Some((Ipv4Addr::from(first), Ipv4Addr::from(last)))
}

impl Render for DnsmasqConfig<'_> {
    type Context = ();
    type Output = Option<ConfigBuilder>;
    fn render(&self, _ctx: &Self::Context) -> Option<ConfigBuilder> {
        let mut config = ConfigBuilder::new();
        config += "# generated by pdconfd";
        config.set("interface", &self.device);
        config.flag("bind-interfaces");
        config.set("dhcp-leasefile", self.leasefile.display());
        config.set_if("port", self.dnsmasq.port);
        config.set_if("domain", self.dnsmasq.domain.as_ref());
        if self.dnsmasq.noresolv {
            config.flag("no-resolv");
        }
        for server in &self.dnsmasq.servers {
            config.set("server", server);
        }
        if let Some(relay) = self.dhcp.relay {
            config.set("dhcp-relay", format!("{},{relay}", self.address.addr()));
        } else {
            let (first, last) = dhcp_range(self.address, self.dhcp.start, self.dhcp.limit)?;
            config.set(
                "dhcp-range",
                format!("{first},{last},{},{}", self.address.netmask(), self.dhcp.leasetime),
            );
            config.flag("dhcp-authoritative");
        }
        for option in &self.dhcp.dhcp_options {
            config.set("dhcp-option", option);
        }
        Some(config)
    }
}

impl Dnsmasq {
    /// The dhcp sections this instance serves
    fn served<'a>(
        &'a self,
        key: &'a SectionKey,
        all: &'a ConfigSet,
    ) -> impl Iterator<Item = (&'a SectionKey, &'a Dhcp)> + 'a {
        all.of_kind("dhcp", "dhcp").filter_map(move |s| match &s.body {
            SectionBody::Dhcp(d) if !d.ignore => {
                let mine = match &d.instance {
                    Some(instance) => *instance == key.name,
                    None => self.interfaces.is_empty() || self.interfaces.contains(&d.interface),
                };
                mine.then_some((&s.key, d))
            }
            _ => None,
        })
    }
}

impl SectionOps for Dnsmasq {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            interfaces: opts.list("interface"),
            domain: opts.opt("domain"),
            servers: opts.list("server"),
            noresolv: opts.bool("noresolv", false)?,
            port: opts.parse("port")?,
        })
    }

    fn dependencies(&self, key: &SectionKey, all: &ConfigSet) -> Vec<SectionKey> {
        let mut deps: Vec<SectionKey> = self
            .interfaces
            .iter()
            .map(|i| SectionKey::network(i.as_str()))
            .collect();
        for (dhcp_key, dhcp) in self.served(key, all) {
            deps.push(dhcp_key.clone());
            let network = SectionKey::network(&dhcp.interface);
            if !deps.contains(&network) {
                deps.push(network);
            }
        }
        deps
    }

    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        let mut cmds = vec![];
        for (_, dhcp) in self.served(key, env.all) {
            let invalid = |reason: String| ConfdError::Invalid {
                key: key.clone(),
                reason,
            };
            let interface = env
                .all
                .interface(&dhcp.interface)
                .ok_or_else(|| invalid(format!("no interface {}", dhcp.interface)))?;
            let address = interface.address.ok_or_else(|| {
                invalid(format!("interface {} has no static address", dhcp.interface))
            })?;
            let instance = &dhcp.interface;
            let config = DnsmasqConfig {
                dnsmasq: self,
                dhcp,
                device: interface.device(&dhcp.interface),
                address,
                leasefile: env.write_dir.join(format!("dnsmasq-{instance}.leases")),
            }
            .render(&())
            .ok_or_else(|| invalid(format!("empty DHCP range on {address}")))?;
            let path = env.conf_file("dnsmasq", instance);
            let pid = env.pid_file("dnsmasq", instance);
            cmds.push((prio::WRITE_FILE, Command::write_file(&path, config.to_string())));
            let daemon = cmd!(
                "dnsmasq",
                format!("--conf-file={}", path.display()),
                format!("--pid-file={}", pid.display())
            );
            cmds.push((prio::START_DAEMON, daemon.class(TimeoutClass::Long)));
        }
        Ok(cmds)
    }

    fn revert(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        let mut cmds = vec![];
        for (_, dhcp) in self.served(key, env.all) {
            let instance = &dhcp.interface;
            let pid = env.pid_file("dnsmasq", instance);
            cmds.push((prio::KILL_DAEMON, Command::kill_pid_file(pid)));
            let conf = env.conf_file("dnsmasq", instance);
            cmds.push((prio::REMOVE_FILE, Command::remove_file(conf)));
        }
        Ok(cmds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const CONFIG: &str = "config dnsmasq 'hello-wlan0'
\tlist interface 'hello-wlan0'
\toption port '0'

config dhcp 'hello-wlan0'
\toption interface 'hello-wlan0'
\toption instance 'hello-wlan0'
\toption start '100'
\toption limit '100'
\toption leasetime '12h'
\tlist dhcp_option '6,8.8.8.8'
";

    fn load() -> ConfigSet {
        let mut set = ConfigSet::new();
        set.add_file(
            "network",
            &uci::parse(
                "config interface 'hello-wlan0'\n\toption ifname 'vwlan0.0000'\n\toption proto 'static'\n\toption ipaddr '192.168.128.1'\n\toption netmask '255.255.255.0'\n",
            )
            .unwrap(),
        );
        assert!(set.add_file("dhcp", &uci::parse(CONFIG).unwrap()).is_empty());
        set
    }

    #[test]
    fn range_is_clamped() {
        let net: Ipv4Net = "10.0.0.1/24".parse().unwrap();
        assert_eq!(
            dhcp_range(net, 100, 100),
            Some((Ipv4Addr::new(10, 0, 0, 100), Ipv4Addr::new(10, 0, 0, 199)))
        );
        assert_eq!(
            dhcp_range(net, 200, 150),
            Some((Ipv4Addr::new(10, 0, 0, 200), Ipv4Addr::new(10, 0, 0, 254)))
        );
        assert_eq!(dhcp_range(net, 300, 10), None);
    }

    #[test]
    fn one_instance_per_interface() {
        let set = load();
        let key = SectionKey::new("dhcp", "dnsmasq", "hello-wlan0");
        let section = set.get(&key).unwrap();
        let deps = section.dependencies(&set);
        assert!(deps.contains(&SectionKey::network("hello-wlan0")));
        assert!(deps.contains(&SectionKey::new("dhcp", "dhcp", "hello-wlan0")));

        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        let cmds = section.apply(&env).unwrap();
        assert_eq!(cmds.len(), 2);
        let exec::Action::WriteFile { path, contents } = &cmds[0].1.action else {
            panic!("Should write the config first");
        };
        assert_eq!(path, Path::new("/run/pd/dnsmasq-hello-wlan0.conf"));
        assert_eq!(
            contents,
            "# generated by pdconfd
interface=vwlan0.0000
bind-interfaces
dhcp-leasefile=/run/pd/dnsmasq-hello-wlan0.leases
port=0
dhcp-range=192.168.128.100,192.168.128.199,255.255.255.0,12h
dhcp-authoritative
dhcp-option=6,8.8.8.8
"
        );
        assert_eq!(
            cmds[1].1.to_string(),
            "dnsmasq --conf-file=/run/pd/dnsmasq-hello-wlan0.conf --pid-file=/run/pd/dnsmasq-hello-wlan0.pid"
        );
        let revert = section.revert(&env).unwrap();
        assert_eq!(revert[0].1.to_string(), "kill $(cat /run/pd/dnsmasq-hello-wlan0.pid)");
    }

    #[test]
    fn relay_is_not_authoritative() {
        let mut set = load();
        set.add_file(
            "dhcp",
            &uci::parse(
                "config dhcp 'hello-wlan0'\n\toption interface 'hello-wlan0'\n\toption instance 'hello-wlan0'\n\toption relay '10.0.0.53'\n",
            )
            .unwrap(),
        );
        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        let section = set.get(&SectionKey::new("dhcp", "dnsmasq", "hello-wlan0")).unwrap();
        let cmds = section.apply(&env).unwrap();
        let exec::Action::WriteFile { contents, .. } = &cmds[0].1.action else {
            panic!("Should write the config first");
        };
        assert!(contents.contains("dhcp-relay=192.168.128.1,10.0.0.53\n"));
        assert!(!contents.contains("dhcp-authoritative"));
        assert!(!contents.contains("dhcp-range"));
    }
}
