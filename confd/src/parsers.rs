// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Parsers for the text output of the daemons confd runs

use ordermap::OrderMap;
use serde::Serialize;
use std::net::IpAddr;

/// One line of a dnsmasq lease file: `expiry mac ip hostname client-id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DhcpLease {
    pub expires: u64,
    pub mac_addr: String,
    pub ip_addr: IpAddr,
    pub hostname: Option<String>,
    pub client_id: Option<String>,
}

/// `*` marks an unknown field
fn known(field: Option<&str>) -> Option<String> {
    field.filter(|f| *f != "*").map(str::to_string)
}

/// Parse a dnsmasq lease file. Malformed lines are skipped.
#[must_use]
pub fn parse_leases(text: &str) -> Vec<DhcpLease> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let expires = fields.next()?.parse().ok()?;
            let mac_addr = fields.next()?.to_lowercase();
            let ip_addr = fields.next()?.parse().ok()?;
            Some(DhcpLease {
                expires,
                mac_addr,
                ip_addr,
                hostname: known(fields.next()),
                client_id: known(fields.next()),
            })
        })
        .collect()
}

/// A station of `iw dev <if> station dump`, with its attributes as printed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Station {
    pub mac_addr: String,
    #[serde(flatten)]
    pub attributes: OrderMap<String, String>,
}

impl Station {
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.attributes.get(attribute).map(String::as_str)
    }
}

/// Parse the output of `iw dev <if> station dump`: a `Station <mac> (on <if>)` header per
/// station, followed by indented `key: value` lines. Keys are lowercased with spaces
/// replaced by underscores (`rx bytes` becomes `rx_bytes`).
#[must_use]
pub fn parse_station_dump(text: &str) -> Vec<Station> {
    let mut stations = vec![];
    let mut current: Option<Station> = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("Station ") {
            if let Some(done) = current.take() {
                stations.push(done);
            }
            if let Some(mac) = rest.split_whitespace().next() {
                current = Some(Station {
                    mac_addr: mac.to_lowercase(),
                    attributes: OrderMap::new(),
                });
            }
        } else if let (Some(station), Some((key, value))) =
            (current.as_mut(), line.split_once(':'))
        {
            let key = key.trim().to_lowercase().replace(' ', "_");
            if !key.is_empty() {
                station.attributes.insert(key, value.trim().to_string());
            }
        }
    }
    if let Some(done) = current {
        stations.push(done);
    }
    stations
}

/// Parse `key=value` lines such as the output of `hostapd_cli status`
#[must_use]
pub fn parse_key_values(text: &str) -> OrderMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
