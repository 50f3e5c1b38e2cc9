// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `interface` sections of the network file

use exec::{Command, TimeoutClass};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

use crate::errors::ConfdError;
use crate::options::Options;
use crate::prio;
use crate::section::{Commands, Env, SectionKey, SectionOps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Proto {
    Static,
    Dhcp,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// An existing device, or one created by another section (e.g. a wireless interface)
    Plain(String),
    /// A bridge named `br-<section name>` enslaving its members
    Bridge(Vec<String>),
    /// An 802.1Q sub-interface of `parent`
    Vlan {
        ifname: String,
        parent: String,
        vid: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub proto: Proto,
    pub link: Link,
    pub address: Option<Ipv4Net>,
    pub gateway: Option<Ipv4Addr>,
    pub dns: Vec<String>,
}

fn enslave(member: &str, bridge: &str) -> Command {
    cmd!("ip", "link", "set", "dev", member, "master", bridge)
}

fn release(member: &str) -> Command {
    cmd!("ip", "link", "set", "dev", member, "nomaster")
}

fn parse_address(opts: &Options<'_>) -> Result<Option<Ipv4Net>, ConfdError> {
    let Some(ipaddr) = opts.opt("ipaddr") else {
        return Ok(None);
    };
    if let Ok(net) = ipaddr.parse::<Ipv4Net>() {
        return Ok(Some(net));
    }
    let addr: Ipv4Addr = opts.parse_required("ipaddr")?;
    let netmask: Ipv4Addr = opts.parse_or("netmask", Ipv4Addr::new(255, 255, 255, 0))?;
    Ipv4Net::with_netmask(addr, netmask)
        .map(Some)
        .map_err(|_| opts.bad_value("netmask", &netmask.to_string()))
}

impl Interface {
    /// The Linux device carrying this interface
    #[must_use]
    pub fn device(&self, name: &str) -> String {
        match &self.link {
            Link::Plain(ifname) | Link::Vlan { ifname, .. } => ifname.clone(),
            Link::Bridge(_) => format!("br-{name}"),
        }
    }

    fn address_commands(&self, dev: &str, add: bool) -> Commands {
        let mut cmds = vec![];
        let (verb, addr_prio, route_prio) = if add {
            ("add", prio::ADD_ADDR, prio::ADD_ROUTE)
        } else {
            ("del", prio::DELETE_ADDR, prio::DELETE_ADDR)
        };
        if self.proto != Proto::Static {
            return cmds;
        }
        if let Some(address) = self.address {
            cmds.push((addr_prio, cmd!("ip", "addr", verb, address, "dev", dev)));
        }
        if let Some(gw) = self.gateway {
            let route = cmd!("ip", "route", verb, "default", "via", gw, "dev", dev);
            // the route goes away with the address
            let route = if add { route } else { route.ignore_failure() };
            cmds.push((route_prio, route));
        }
        cmds
    }

    fn dhclient(&self, dev: &str, env: &Env<'_>, start: bool) -> Commands {
        if self.proto != Proto::Dhcp {
            return vec![];
        }
        let pid = env.pid_file("dhclient", dev);
        if start {
            vec![(
                prio::START_DAEMON,
                cmd!("dhclient", "-nw", "-pf", pid.display(), dev).class(TimeoutClass::Long),
            )]
        } else {
            vec![(prio::KILL_DAEMON, Command::kill_pid_file(pid))]
        }
    }
}

impl SectionOps for Interface {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        let proto = opts.parse_or("proto", Proto::None)?;
        let link = match opts.opt("type").as_deref() {
            Some("bridge") => Link::Bridge(opts.list("ifname")),
            Some("vlan") => Link::Vlan {
                ifname: opts.required("ifname")?,
                parent: opts.required("device")?,
                vid: opts.parse_required("vid")?,
            },
            None => Link::Plain(opts.required("ifname")?),
            Some(other) => return Err(opts.bad_value("type", other)),
        };
        let address = parse_address(opts)?;
        if proto == Proto::Static && address.is_none() {
            opts.required("ipaddr")?;
        }
        Ok(Self {
            proto,
            link,
            address,
            gateway: opts.parse("gateway")?,
            dns: opts.list("dns"),
        })
    }

    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        let dev = self.device(&key.name);
        let mut cmds = vec![];
        match &self.link {
            Link::Plain(_) => {}
            Link::Bridge(members) => {
                let bridge = cmd!("ip", "link", "add", "name", &dev, "type", "bridge");
                cmds.push((prio::CREATE_BRIDGE, bridge));
                for member in members {
                    cmds.push((prio::ADD_MEMBER, enslave(member, &dev)));
                    cmds.push((prio::LINK_UP, cmd!("ip", "link", "set", "dev", member, "up")));
                }
            }
            Link::Vlan { ifname, parent, vid } => {
                cmds.push((
                    prio::CREATE_LINK,
                    cmd!(
                        "ip",
                        "link",
                        "add",
                        "link",
                        parent,
                        "name",
                        ifname,
                        "type",
                        "vlan",
                        "id",
                        vid,
                    ),
                ));
            }
        }
        cmds.extend(self.address_commands(&dev, true));
        cmds.push((prio::LINK_UP, cmd!("ip", "link", "set", "dev", &dev, "up")));
        cmds.extend(self.dhclient(&dev, env, true));
        Ok(cmds)
    }

    fn revert(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        let dev = self.device(&key.name);
        let mut cmds = self.dhclient(&dev, env, false);
        cmds.extend(self.address_commands(&dev, false));
        match &self.link {
            Link::Plain(_) => {}
            Link::Bridge(members) => {
                for member in members {
                    cmds.push((prio::REMOVE_MEMBER, release(member)));
                }
                cmds.push((prio::DELETE_LINK, cmd!("ip", "link", "del", &dev)));
            }
            Link::Vlan { ifname, .. } => {
                cmds.push((prio::DELETE_LINK, cmd!("ip", "link", "del", ifname)));
            }
        }
        Ok(cmds)
    }

    fn can_update(&self, old: &Self) -> bool {
        match (&self.link, &old.link) {
            (Link::Bridge(_), Link::Bridge(_)) => true,
            (a, b) => a == b,
        }
    }

    fn update_revert(
        &self,
        old: &Self,
        key: &SectionKey,
        old_env: &Env<'_>,
    ) -> Result<Commands, ConfdError> {
        let dev = old.device(&key.name);
        let mut cmds = vec![];
        if old.proto != self.proto {
            cmds.extend(old.dhclient(&dev, old_env, false));
        }
        if old.proto != self.proto || old.address != self.address || old.gateway != self.gateway {
            cmds.extend(old.address_commands(&dev, false));
        }
        if let (Link::Bridge(new), Link::Bridge(prev)) = (&self.link, &old.link) {
            for member in prev.iter().filter(|m| !new.contains(m)) {
                cmds.push((prio::REMOVE_MEMBER, release(member)));
            }
        }
        Ok(cmds)
    }

    fn update_apply(
        &self,
        old: &Self,
        key: &SectionKey,
        env: &Env<'_>,
    ) -> Result<Commands, ConfdError> {
        let dev = self.device(&key.name);
        let mut cmds = vec![];
        if let (Link::Bridge(new), Link::Bridge(prev)) = (&self.link, &old.link) {
            for member in new.iter().filter(|m| !prev.contains(m)) {
                cmds.push((prio::ADD_MEMBER, enslave(member, &dev)));
                cmds.push((prio::LINK_UP, cmd!("ip", "link", "set", "dev", member, "up")));
            }
        }
        if old.proto != self.proto || old.address != self.address || old.gateway != self.gateway {
            cmds.extend(self.address_commands(&dev, true));
        }
        if old.proto != self.proto {
            cmds.extend(self.dhclient(&dev, env, true));
        }
        Ok(cmds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{ConfigSet, SectionBody};
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn load(text: &str) -> ConfigSet {
        let mut set = ConfigSet::new();
        let errors = set.add_file("network", &uci::parse(text).unwrap());
        assert!(errors.is_empty(), "{errors:?}");
        set
    }

    fn lines(cmds: &Commands) -> Vec<String> {
        let mut cmds = cmds.clone();
        cmds.sort_by_key(|(p, _)| *p);
        cmds.iter().map(|(_, c)| c.to_string()).collect()
    }

    fn iface(set: &ConfigSet, name: &str) -> Interface {
        match &set.get(&SectionKey::network(name)).unwrap().body {
            SectionBody::Interface(i) => i.clone(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn bridge_with_static_address() {
        let set = load(
            "config interface 'lan'\n\toption type 'bridge'\n\tlist ifname 'eth1'\n\tlist ifname 'eth2'\n\toption proto 'static'\n\toption ipaddr '192.168.1.1'\n\toption netmask '255.255.255.0'\n",
        );
        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        let key = SectionKey::network("lan");
        let lan = iface(&set, "lan");
        assert_eq!(
            lines(&lan.apply(&key, &env).unwrap()),
            vec![
                "ip link add name br-lan type bridge",
                "ip link set dev eth1 master br-lan",
                "ip link set dev eth2 master br-lan",
                "ip addr add 192.168.1.1/24 dev br-lan",
                "ip link set dev eth1 up",
                "ip link set dev eth2 up",
                "ip link set dev br-lan up",
            ]
        );
        assert_eq!(
            lines(&lan.revert(&key, &env).unwrap()),
            vec![
                "ip addr del 192.168.1.1/24 dev br-lan",
                "ip link set dev eth1 nomaster",
                "ip link set dev eth2 nomaster",
                "ip link del br-lan",
            ]
        );
    }

    #[test]
    fn incremental_member_and_address_update() {
        let old = load(
            "config interface 'lan'\n\toption type 'bridge'\n\tlist ifname 'eth1'\n\tlist ifname 'eth2'\n\toption proto 'static'\n\toption ipaddr '192.168.1.1/24'\n",
        );
        let new = load(
            "config interface 'lan'\n\toption type 'bridge'\n\tlist ifname 'eth1'\n\tlist ifname 'eth3'\n\toption proto 'static'\n\toption ipaddr '192.168.2.1/24'\n",
        );
        let key = SectionKey::network("lan");
        let (o, n) = (iface(&old, "lan"), iface(&new, "lan"));
        assert!(n.can_update(&o));
        let old_env = Env {
            all: &old,
            write_dir: Path::new("/run/pd"),
        };
        let env = Env {
            all: &new,
            write_dir: Path::new("/run/pd"),
        };
        assert_eq!(
            lines(&n.update_revert(&o, &key, &old_env).unwrap()),
            vec!["ip addr del 192.168.1.1/24 dev br-lan", "ip link set dev eth2 nomaster"]
        );
        assert_eq!(
            lines(&n.update_apply(&o, &key, &env).unwrap()),
            vec![
                "ip link set dev eth3 master br-lan",
                "ip addr add 192.168.2.1/24 dev br-lan",
                "ip link set dev eth3 up",
            ]
        );
    }

    #[test]
    fn vlan_and_dhcp() {
        let set = load(
            "config interface 'wan'\n\toption ifname 'eth0'\n\toption proto 'dhcp'\n\nconfig interface 'guest'\n\toption type 'vlan'\n\toption ifname 'eth1.20'\n\toption device 'eth1'\n\toption vid '20'\n\toption proto 'static'\n\toption ipaddr '10.20.0.1/24'\n",
        );
        let env = Env {
            all: &set,
            write_dir: Path::new("/run/pd"),
        };
        let wan = iface(&set, "wan");
        assert_eq!(
            lines(&wan.apply(&SectionKey::network("wan"), &env).unwrap()),
            vec!["ip link set dev eth0 up", "dhclient -nw -pf /run/pd/dhclient-eth0.pid eth0"]
        );
        let guest = iface(&set, "guest");
        assert_eq!(
            lines(&guest.apply(&SectionKey::network("guest"), &env).unwrap())[0],
            "ip link add link eth1 name eth1.20 type vlan id 20"
        );
        assert_eq!(set.device_of("guest").as_deref(), Some("eth1.20"));
    }

    #[test]
    fn static_needs_an_address() {
        let file =
            uci::parse("config interface 'x'\n\toption ifname 'eth0'\n\toption proto 'static'\n")
                .unwrap();
        let mut set = ConfigSet::new();
        assert_eq!(set.add_file("network", &file).len(), 1);
    }
}
