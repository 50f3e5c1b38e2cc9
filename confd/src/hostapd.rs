// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Config renderer: hostapd

use std::path::PathBuf;

use crate::builder::{ConfigBuilder, Render};
use crate::wireless::{KeyMgmt, WifiDevice, WifiIface};

/// Everything hostapd needs to know about one access point
#[derive(Debug)]
pub struct HostapdConfig<'a> {
    pub iface: &'a WifiIface,
    pub device: &'a WifiDevice,
    pub bridge: Option<String>,
    pub ctrl_dir: PathBuf,
}

fn hw_mode(device: &WifiDevice) -> &'static str {
    match device.hwmode.as_deref() {
        Some("11a" | "11na" | "11ac" | "a") => "a",
        Some("11b" | "b") => "b",
        Some("11g" | "11ng" | "11n" | "g") => "g",
        _ if device.channel > 14 => "a",
        _ => "g",
    }
}

/// Secondary channel above or below the primary, on 5 GHz where 40 MHz pairs are fixed
fn ht40_direction(channel: u16) -> &'static str {
    match channel {
        1..=7 | 36 | 44 | 52 | 60 | 100 | 108 | 116 | 124 | 132 | 140 | 149 | 157 => "[HT40+]",
        _ => "[HT40-]",
    }
}

/// Center channel of the 80 MHz block holding `channel`
fn vht80_center(channel: u16) -> Option<u16> {
    match channel {
        36..=144 => Some(36 + (channel - 36) / 16 * 16 + 6),
        149..=161 => Some(155),
        _ => None,
    }
}

impl HostapdConfig<'_> {
    fn radio(&self) -> ConfigBuilder {
        let mut config = ConfigBuilder::new();
        let device = self.device;
        config.set("hw_mode", hw_mode(device));
        config.set("channel", device.channel);
        if let Some(country) = &device.country {
            config.set("country_code", country);
            config.set("ieee80211d", 1);
        }
        let htmode = device.htmode.as_deref().unwrap_or("NOHT");
        if htmode.starts_with("HT") || htmode.starts_with("VHT") {
            config.set("ieee80211n", 1);
            config.set("wmm_enabled", 1);
        }
        match htmode {
            "HT40+" | "HT40" => config.set("ht_capab", "[HT40+]"),
            "HT40-" => config.set("ht_capab", "[HT40-]"),
            "VHT40" | "VHT80" | "VHT160" => config.set("ht_capab", ht40_direction(device.channel)),
            _ => {}
        }
        if htmode.starts_with("VHT") {
            config.set("ieee80211ac", 1);
            let (width, center) = match htmode {
                "VHT80" => (1, vht80_center(device.channel)),
                "VHT160" => (2, None),
                _ => (0, None),
            };
            config.set("vht_oper_chwidth", width);
            config.set_if("vht_oper_centr_freq_seg0_idx", center);
        }
        config
    }

    fn security(&self) -> ConfigBuilder {
        let mut config = ConfigBuilder::new();
        let iface = self.iface;
        let enc = iface.encryption;
        config.set("auth_algs", 1);
        if enc.key_mgmt == KeyMgmt::Open {
            return config;
        }
        config.set("wpa", enc.wpa);
        if enc.wpa & 1 != 0 {
            config.set("wpa_pairwise", enc.ciphers());
        }
        if enc.wpa & 2 != 0 {
            config.set("rsn_pairwise", enc.ciphers());
        }
        match enc.key_mgmt {
            KeyMgmt::Psk => {
                config.set("wpa_key_mgmt", "WPA-PSK");
                if let Some(key) = &iface.key {
                    if key.len() == 64 {
                        config.set("wpa_psk", key);
                    } else {
                        config.set("wpa_passphrase", key);
                    }
                }
            }
            KeyMgmt::Eap => {
                config.set("wpa_key_mgmt", "WPA-EAP");
                config.set("ieee8021x", 1);
                if let Some(radius) = &iface.radius {
                    config.set("auth_server_addr", &radius.server);
                    config.set("auth_server_port", radius.port);
                    config.set("auth_server_shared_secret", &radius.secret);
                }
            }
            KeyMgmt::Open => {}
        }
        config
    }
}

impl Render for HostapdConfig<'_> {
    type Context = ();
    type Output = ConfigBuilder;
    fn render(&self, _ctx: &Self::Context) -> ConfigBuilder {
        let iface = self.iface;
        let mut config = ConfigBuilder::new();
        config += "# generated by pdconfd";
        config.set("interface", &iface.ifname);
        config.set_if("bridge", self.bridge.as_ref());
        config.set("driver", "nl80211");
        config.set("ctrl_interface", self.ctrl_dir.display());
        config.set("ssid", iface.ssid.as_deref().unwrap_or_default());
        if iface.hidden {
            config.set("ignore_broadcast_ssid", 1);
        }
        if iface.isolate {
            config.set("ap_isolate", 1);
        }
        config.set_if("max_num_sta", iface.maxassoc);
        config.set_if("nas_identifier", iface.nasid.as_ref());
        config += self.radio();
        config += self.security();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wireless::Encryption;
    use pretty_assertions::assert_eq;

    fn device(channel: u16, hwmode: &str, htmode: &str) -> WifiDevice {
        WifiDevice {
            phy: "phy0".to_string(),
            channel,
            hwmode: Some(hwmode.to_string()),
            htmode: Some(htmode.to_string()),
            txpower: None,
            country: Some("US".to_string()),
        }
    }

    fn iface(encryption: &str, key: Option<&str>) -> WifiIface {
        WifiIface {
            device: "radio0".to_string(),
            mode: crate::wireless::WifiMode::Ap,
            ifname: "vwlan0.0000".to_string(),
            ssid: Some("Paradrop".to_string()),
            encryption: encryption.parse::<Encryption>().unwrap(),
            key: key.map(str::to_string),
            network: None,
            hidden: false,
            isolate: false,
            maxassoc: None,
            nasid: None,
            radius: None,
        }
    }

    #[test]
    fn wpa2_on_2ghz() {
        let iface = iface("psk2", Some("password123"));
        let device = device(1, "11g", "HT20");
        let config = HostapdConfig {
            iface: &iface,
            device: &device,
            bridge: None,
            ctrl_dir: PathBuf::from("/run/pd/hostapd"),
        };
        assert_eq!(
            config.render(&()).to_string(),
            "# generated by pdconfd
interface=vwlan0.0000
driver=nl80211
ctrl_interface=/run/pd/hostapd
ssid=Paradrop
hw_mode=g
channel=1
country_code=US
ieee80211d=1
ieee80211n=1
wmm_enabled=1
auth_algs=1
wpa=2
rsn_pairwise=CCMP
wpa_key_mgmt=WPA-PSK
wpa_passphrase=password123
"
        );
    }

    #[test]
    fn vht80_open_bridged() {
        let iface = iface("none", None);
        let device = device(36, "11a", "VHT80");
        let config = HostapdConfig {
            iface: &iface,
            device: &device,
            bridge: Some("br-lan".to_string()),
            ctrl_dir: PathBuf::from("/run/pd/hostapd"),
        };
        let first = config.render(&()).to_string();
        assert!(first.contains("bridge=br-lan\n"));
        assert!(first.contains("hw_mode=a\n"));
        assert!(first.contains("ht_capab=[HT40+]\n"));
        assert!(first.contains("vht_oper_chwidth=1\nvht_oper_centr_freq_seg0_idx=42\n"));
        assert!(!first.contains("wpa="));
        // rendering is deterministic
        assert_eq!(first, config.render(&()).to_string());
    }

    #[test]
    fn vht80_centers() {
        assert_eq!(vht80_center(36), Some(42));
        assert_eq!(vht80_center(48), Some(42));
        assert_eq!(vht80_center(52), Some(58));
        assert_eq!(vht80_center(112), Some(106));
        assert_eq!(vht80_center(157), Some(155));
        assert_eq!(vht80_center(6), None);
    }
}
