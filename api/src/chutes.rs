// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `/api/v1/chutes`: install, inspect and drive chutes

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chute::{Chute, ChuteCache, ChuteState, NetKind, NetworkInterface, extract_package};
use confd::parsers::{DhcpLease, Station, parse_key_values, parse_leases, parse_station_dump};
use exec::TimeoutClass;
use serde::Serialize;
use serde_json::{Value, json};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, warn};
use update::{UpdateRequest, UpdateType};

use crate::errors::ApiError;
use crate::state::ApiState;

#[derive(Debug, Serialize)]
pub struct ChuteSummary {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub state: ChuteState,
    pub web_url: Option<String>,
}

impl From<&Chute> for ChuteSummary {
    fn from(chute: &Chute) -> Self {
        Self {
            name: chute.name.clone(),
            version: chute.version.clone(),
            description: chute.description.clone(),
            state: chute.state,
            web_url: chute.cache.web_url.clone(),
        }
    }
}

/// A chute interface without its secrets
#[derive(Debug, Serialize)]
pub struct NetworkSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NetKind,
    pub interface: String,
    pub external_intf: String,
    pub ipaddr: Option<Ipv4Addr>,
    pub ssid: Option<String>,
}

impl From<&NetworkInterface> for NetworkSummary {
    fn from(iface: &NetworkInterface) -> Self {
        Self {
            name: iface.name.clone(),
            kind: iface.kind,
            interface: iface.internal_intf.clone(),
            external_intf: iface.external_intf.clone(),
            ipaddr: iface.internal_ipaddr,
            ssid: iface.ssid.clone(),
        }
    }
}

pub(crate) fn accepted(change_id: u64) -> (StatusCode, Json<Value>) {
    (StatusCode::ACCEPTED, Json(json!({ "change_id": change_id })))
}

fn installed(state: &ApiState, name: &str) -> Result<Arc<Chute>, ApiError> {
    state
        .env()
        .catalog
        .get(name)
        .ok_or_else(|| ApiError::NotFound(format!("chute {name}")))
}

fn interface<'a>(chute: &'a Chute, iface: &str) -> Result<&'a NetworkInterface, ApiError> {
    chute
        .cache
        .network_interfaces
        .iter()
        .find(|i| i.name == iface)
        .ok_or_else(|| ApiError::NotFound(format!("interface {iface} of chute {}", chute.name)))
}

/// Extract an uploaded package and queue its installation. A chute already installed is
/// updated, otherwise created.
async fn install(state: &ApiState, body: Bytes, expected: Option<&str>) -> Result<u64, ApiError> {
    let sources = state.env().settings.sources_dir();
    let chute = tokio::task::spawn_blocking(move || extract_package(body.as_ref(), &sources))
        .await
        .map_err(|e| ApiError::Internal(format!("package extraction: {e}")))??;

    let discard = |chute: &Chute| {
        if let Some(dir) = &chute.source_dir
            && let Err(e) = std::fs::remove_dir_all(dir)
        {
            warn!("Failed to remove {}: {e}", dir.display());
        }
    };
    if let Some(name) = expected
        && chute.name != name
    {
        discard(&chute);
        return Err(ApiError::BadRequest(format!(
            "package of chute {} uploaded to chute {name}",
            chute.name
        )));
    }
    let kind = if state.env().catalog.get(&chute.name).is_some() {
        UpdateType::Update
    } else {
        UpdateType::Create
    };
    let name = chute.name.clone();
    let source_dir = chute.source_dir.clone();
    match state.manager.add_update(UpdateRequest::install(kind, chute)) {
        Ok(handle) => {
            info!("Queued {kind} of {name} as change {}", handle.change_id);
            Ok(handle.change_id)
        }
        Err(e) => {
            let mut orphan = Chute::named(&name);
            orphan.source_dir = source_dir;
            discard(&orphan);
            Err(e.into())
        }
    }
}

fn queue(
    state: &ApiState,
    kind: UpdateType,
    name: &str,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let handle = state
        .manager
        .add_update(UpdateRequest::chute_named(kind, name))?;
    Ok(accepted(handle.change_id))
}

pub async fn list(State(state): State<ApiState>) -> Json<Vec<ChuteSummary>> {
    Json(
        state
            .env()
            .catalog
            .list()
            .iter()
            .map(|c| ChuteSummary::from(c.as_ref()))
            .collect(),
    )
}

pub async fn create(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    Ok(accepted(install(&state, body, None).await?))
}

pub async fn get(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Chute>, ApiError> {
    let chute = installed(&state, &name)?;
    Ok(Json(chute.as_ref().clone()))
}

pub async fn update(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    Ok(accepted(install(&state, body, Some(&name)).await?))
}

pub async fn delete(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    installed(&state, &name)?;
    queue(&state, UpdateType::Delete, &name)
}

pub async fn start(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    installed(&state, &name)?;
    queue(&state, UpdateType::Start, &name)
}

pub async fn stop(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    installed(&state, &name)?;
    queue(&state, UpdateType::Stop, &name)
}

pub async fn restart(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    installed(&state, &name)?;
    queue(&state, UpdateType::Restart, &name)
}

pub async fn cache(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<ChuteCache>, ApiError> {
    Ok(Json(installed(&state, &name)?.cache.clone()))
}

pub async fn networks(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<NetworkSummary>>, ApiError> {
    let chute = installed(&state, &name)?;
    Ok(Json(
        chute
            .cache
            .network_interfaces
            .iter()
            .map(NetworkSummary::from)
            .collect(),
    ))
}

pub async fn network(
    State(state): State<ApiState>,
    Path((name, iface)): Path<(String, String)>,
) -> Result<Json<NetworkSummary>, ApiError> {
    let chute = installed(&state, &name)?;
    Ok(Json(NetworkSummary::from(interface(&chute, &iface)?)))
}

pub async fn ssid(
    State(state): State<ApiState>,
    Path((name, iface)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let chute = installed(&state, &name)?;
    let iface = interface(&chute, &iface)?;
    Ok(Json(json!({ "ssid": iface.ssid })))
}

/// DHCP leases handed out on a chute interface; none before dnsmasq wrote its lease file
pub async fn leases(
    State(state): State<ApiState>,
    Path((name, iface)): Path<(String, String)>,
) -> Result<Json<Vec<DhcpLease>>, ApiError> {
    let chute = installed(&state, &name)?;
    interface(&chute, &iface)?;
    let path = state
        .env()
        .settings
        .write_dir
        .join(format!("dnsmasq-{name}-{iface}.leases"));
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ApiError::Internal(format!("failed to read {}: {e}", path.display()))),
    };
    Ok(Json(parse_leases(&text)))
}

pub async fn stations(
    State(state): State<ApiState>,
    Path((name, iface)): Path<(String, String)>,
) -> Result<Json<Vec<Station>>, ApiError> {
    let chute = installed(&state, &name)?;
    let iface = interface(&chute, &iface)?;
    let argv: Vec<String> = ["iw", "dev", &iface.external_intf, "station", "dump"]
        .iter()
        .map(ToString::to_string)
        .collect();
    let output = state.env().runner.run(&argv, TimeoutClass::Short).await?;
    Ok(Json(parse_station_dump(&output.stdout.join("\n"))))
}

pub async fn hostapd_status(
    State(state): State<ApiState>,
    Path((name, iface)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let chute = installed(&state, &name)?;
    let iface = interface(&chute, &iface)?;
    if iface.kind != NetKind::Wifi {
        return Err(ApiError::BadRequest(format!("{} is not an access point", iface.name)));
    }
    let ctrl_dir = state.env().settings.write_dir.join("hostapd");
    let argv = vec![
        "hostapd_cli".to_string(),
        "-p".to_string(),
        ctrl_dir.display().to_string(),
        "-i".to_string(),
        iface.external_intf.clone(),
        "status".to_string(),
    ];
    let output = state.env().runner.run(&argv, TimeoutClass::Short).await?;
    let status = parse_key_values(&output.stdout.join("\n"));
    serde_json::to_value(status)
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}
