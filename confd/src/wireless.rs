// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `wifi-device` and `wifi-iface` sections of the wireless file

use exec::{Command, TimeoutClass};
use std::str::FromStr;

use crate::builder::Render;
use crate::errors::ConfdError;
use crate::hostapd::HostapdConfig;
use crate::network::Link;
use crate::options::Options;
use crate::prio;
use crate::section::{Commands, Env, SectionKey, SectionOps};

/// A radio. It emits no commands itself; interfaces on it look it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiDevice {
    pub phy: String,
    pub channel: u16,
    pub hwmode: Option<String>,
    pub htmode: Option<String>,
    pub txpower: Option<u32>,
    pub country: Option<String>,
}

impl SectionOps for WifiDevice {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        Ok(Self {
            phy: opts.required("phy")?,
            channel: opts.parse_or("channel", 1)?,
            hwmode: opts.opt("hwmode"),
            htmode: opts.opt("htmode"),
            txpower: opts.parse("txpower")?,
            country: opts.opt("country"),
        })
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMgmt {
    Open,
    Psk,
    Eap,
}

/// A parsed OpenWrt encryption string such as `psk2+ccmp` or `wpa-mixed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encryption {
    pub key_mgmt: KeyMgmt,
    /// 1: WPA, 2: WPA2, 3: both
    pub wpa: u8,
    pub tkip: bool,
    pub ccmp: bool,
}

impl Encryption {
    pub const OPEN: Encryption = Encryption {
        key_mgmt: KeyMgmt::Open,
        wpa: 0,
        tkip: false,
        ccmp: false,
    };

    /// Pairwise ciphers as hostapd spells them
    #[must_use]
    pub fn ciphers(&self) -> String {
        match (self.tkip, self.ccmp) {
            (true, true) => "TKIP CCMP",
            (true, false) => "TKIP",
            _ => "CCMP",
        }
        .to_string()
    }
}

impl FromStr for Encryption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split('+');
        let (key_mgmt, wpa) = match tokens.next().unwrap_or_default() {
            "" | "none" => return Ok(Encryption::OPEN),
            "psk" => (KeyMgmt::Psk, 1),
            "psk2" => (KeyMgmt::Psk, 2),
            "psk-mixed" => (KeyMgmt::Psk, 3),
            "wpa" => (KeyMgmt::Eap, 1),
            "wpa2" => (KeyMgmt::Eap, 2),
            "wpa-mixed" => (KeyMgmt::Eap, 3),
            other => return Err(format!("unsupported encryption '{other}'")),
        };
        let (mut tkip, mut ccmp) = (false, false);
        for cipher in tokens {
            match cipher {
                "tkip" => tkip = true,
                "ccmp" | "aes" => ccmp = true,
                other => return Err(format!("unsupported cipher '{other}'")),
            }
        }
        if !tkip && !ccmp {
            match (key_mgmt, wpa) {
                (_, 3) => (tkip, ccmp) = (true, true),
                (KeyMgmt::Eap, 1) => tkip = true,
                _ => ccmp = true,
            }
        }
        Ok(Self {
            key_mgmt,
            wpa,
            tkip,
            ccmp,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum WifiMode {
    Ap,
    Monitor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiusServer {
    pub server: String,
    pub port: u16,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiIface {
    pub device: String,
    pub mode: WifiMode,
    pub ifname: String,
    pub ssid: Option<String>,
    pub encryption: Encryption,
    pub key: Option<String>,
    pub network: Option<String>,
    pub hidden: bool,
    pub isolate: bool,
    pub maxassoc: Option<u32>,
    pub nasid: Option<String>,
    pub radius: Option<RadiusServer>,
}

impl WifiIface {
    fn hostapd_conf(&self, ifname: &str, env: &Env<'_>) -> std::path::PathBuf {
        env.conf_file("hostapd", ifname)
    }

    fn start_hostapd(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        let device = env
            .all
            .wifi_device(&self.device)
            .ok_or_else(|| missing(key, "wifi-device", &self.device))?;
        let bridge = self
            .network
            .as_ref()
            .and_then(|n| env.all.interface(n).map(|i| (n, i)))
            .and_then(|(n, i)| matches!(i.link, Link::Bridge(_)).then(|| format!("br-{n}")));
        let conf = HostapdConfig {
            iface: self,
            device,
            bridge,
            ctrl_dir: env.write_dir.join("hostapd"),
        }
        .render(&());
        let path = self.hostapd_conf(&self.ifname, env);
        let pid = env.pid_file("hostapd", &self.ifname);
        Ok(vec![
            (prio::WRITE_FILE, Command::write_file(&path, conf.to_string())),
            (
                prio::START_DAEMON,
                cmd!("hostapd", "-B", "-P", pid.display(), path.display())
                    .class(TimeoutClass::Long),
            ),
        ])
    }

    fn stop_hostapd(&self, env: &Env<'_>) -> Commands {
        vec![
            (prio::KILL_DAEMON, Command::kill_pid_file(env.pid_file("hostapd", &self.ifname))),
            (prio::REMOVE_FILE, Command::remove_file(self.hostapd_conf(&self.ifname, env))),
        ]
    }
}

fn missing(key: &SectionKey, kind: &str, name: &str) -> ConfdError {
    ConfdError::MissingDependency {
        key: key.clone(),
        dependency: format!("{kind} '{name}'"),
    }
}

impl SectionOps for WifiIface {
    fn parse(opts: &Options<'_>) -> Result<Self, ConfdError> {
        let mode: WifiMode = opts.parse_or("mode", WifiMode::Ap)?;
        let raw = opts.opt("encryption").unwrap_or_else(|| "none".to_string());
        let encryption: Encryption = raw.parse().map_err(|_| opts.bad_value("encryption", &raw))?;
        let key = opts.opt("key");
        let ssid = opts.opt("ssid");
        if mode == WifiMode::Ap && ssid.as_deref().is_none_or(str::is_empty) {
            opts.required("ssid")?;
        }
        let radius = if encryption.key_mgmt == KeyMgmt::Eap {
            Some(RadiusServer {
                server: opts.required("auth_server")?,
                port: opts.parse_or("auth_port", 1812)?,
                secret: opts.required("auth_secret")?,
            })
        } else {
            None
        };
        if encryption.key_mgmt == KeyMgmt::Psk {
            let psk = opts.required("key")?;
            let hex = psk.len() == 64 && psk.chars().all(|c| c.is_ascii_hexdigit());
            if !hex && !(8..=63).contains(&psk.len()) {
                return Err(opts.bad_value("key", &"*".repeat(psk.len())));
            }
        }
        Ok(Self {
            device: opts.required("device")?,
            mode,
            ifname: opts.required("ifname")?,
            ssid,
            encryption,
            key,
            network: opts.opt("network"),
            hidden: opts.bool("hidden", false)?,
            isolate: opts.bool("isolate", false)?,
            maxassoc: opts.parse("maxassoc")?,
            nasid: opts.opt("nasid"),
            radius,
        })
    }

    fn dependencies(&self, _key: &SectionKey, _all: &crate::section::ConfigSet) -> Vec<SectionKey> {
        let mut deps = vec![SectionKey::new("wireless", "wifi-device", &self.device)];
        if let Some(network) = &self.network {
            deps.push(SectionKey::network(network));
        }
        deps
    }

    fn apply(&self, key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        let device = env
            .all
            .wifi_device(&self.device)
            .ok_or_else(|| missing(key, "wifi-device", &self.device))?;
        let kind = match self.mode {
            WifiMode::Ap => "__ap",
            WifiMode::Monitor => "monitor",
        };
        let mut cmds = vec![(
            prio::CREATE_LINK,
            cmd!("iw", "phy", &device.phy, "interface", "add", &self.ifname, "type", kind),
        )];
        match self.mode {
            WifiMode::Ap => cmds.extend(self.start_hostapd(key, env)?),
            WifiMode::Monitor => {
                cmds.push((prio::LINK_UP, cmd!("ip", "link", "set", "dev", &self.ifname, "up")));
            }
        }
        if let Some(txpower) = device.txpower {
            // per-interface so that it applies once the interface exists
            cmds.push((
                prio::LINK_UP,
                cmd!("iw", "dev", &self.ifname, "set", "txpower", "fixed", txpower * 100)
                    .ignore_failure(),
            ));
        }
        Ok(cmds)
    }

    fn revert(&self, _key: &SectionKey, env: &Env<'_>) -> Result<Commands, ConfdError> {
        let mut cmds = match self.mode {
            WifiMode::Ap => self.stop_hostapd(env),
            WifiMode::Monitor => vec![],
        };
        cmds.push((prio::DELETE_LINK, cmd!("iw", "dev", &self.ifname, "del")));
        Ok(cmds)
    }

    fn can_update(&self, old: &Self) -> bool {
        self.mode == old.mode && self.ifname == old.ifname && self.device == old.device
    }

    /// Everything but the interface itself is hostapd's business: restart it.
    fn update_revert(
        &self,
        old: &Self,
        _key: &SectionKey,
        old_env: &Env<'_>,
    ) -> Result<Commands, ConfdError> {
        Ok(match old.mode {
            WifiMode::Ap => old.stop_hostapd(old_env),
            WifiMode::Monitor => vec![],
        })
    }

    fn update_apply(
        &self,
        _old: &Self,
        key: &SectionKey,
        env: &Env<'_>,
    ) -> Result<Commands, ConfdError> {
        match self.mode {
            WifiMode::Ap => self.start_hostapd(key, env),
            WifiMode::Monitor => Ok(vec![]),
        }
    }
}
