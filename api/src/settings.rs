// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `/api/v1/config`: host configuration, confd status and provisioning

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use config::{HostConfig, Identity};
use confd::SectionStatus;
use serde::Serialize;
use serde_json::Value;
use update::{UpdateRequest, UpdateType};

use crate::chutes::accepted;
use crate::errors::ApiError;
use crate::state::ApiState;

pub async fn get_hostconfig(State(state): State<ApiState>) -> Result<Json<HostConfig>, ApiError> {
    Ok(Json(state.env().host_store.read()?))
}

/// Replace the host configuration. Validated here, applied by an update.
pub async fn put_hostconfig(
    State(state): State<ApiState>,
    Json(hostconfig): Json<HostConfig>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let handle = state
        .manager
        .add_update(UpdateRequest::host(UpdateType::SetHostConfig, Some(hostconfig)))?;
    Ok(accepted(handle.change_id))
}

pub async fn factory_reset(
    State(state): State<ApiState>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let handle = state
        .manager
        .add_update(UpdateRequest::host(UpdateType::FactoryReset, None))?;
    Ok(accepted(handle.change_id))
}

pub async fn get_pdconf(State(state): State<ApiState>) -> Json<Vec<SectionStatus>> {
    Json(state.env().confd.status().await)
}

/// Reload every configuration file now
pub async fn put_pdconf(
    State(state): State<ApiState>,
) -> Result<Json<Vec<SectionStatus>>, ApiError> {
    Ok(Json(state.env().confd.load().await?))
}

#[derive(Debug, Serialize)]
pub struct Provisioned {
    pub provisioned: bool,
    pub id: Option<String>,
    pub controller: Option<String>,
}

pub async fn get_provision(State(state): State<ApiState>) -> Result<Json<Provisioned>, ApiError> {
    let identity = Identity::load(&state.env().settings.identity_file())?;
    Ok(Json(Provisioned {
        provisioned: identity.is_some(),
        id: identity.as_ref().map(|i| i.id.clone()),
        controller: identity.map(|i| i.controller),
    }))
}

pub async fn provision(
    State(state): State<ApiState>,
    Json(identity): Json<Identity>,
) -> Result<Json<Provisioned>, ApiError> {
    identity.save(&state.env().settings.identity_file())?;
    Ok(Json(Provisioned {
        provisioned: true,
        id: Some(identity.id),
        controller: Some(identity.controller),
    }))
}
