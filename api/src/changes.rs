// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use axum::Json;
use axum::extract::{Path, State};
use update::ChangeRecord;

use crate::errors::ApiError;
use crate::state::ApiState;

pub async fn list(State(state): State<ApiState>) -> Json<Vec<ChangeRecord>> {
    Json(state.manager.changes().list())
}

pub async fn get(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<ChangeRecord>, ApiError> {
    state
        .manager
        .changes()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("change {id}")))
}
