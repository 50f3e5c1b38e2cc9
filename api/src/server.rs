// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Routes of the local API and the server running them

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum_server::Handle;
use std::net::SocketAddr;
use tracing::{error, info};

use crate::auth::require_auth;
use crate::errors::ApiError;
use crate::state::ApiState;
use crate::{changes, chutes, settings};

/// Largest chute package accepted
pub const MAX_PACKAGE_SIZE: usize = 512 * 1024 * 1024;

fn chute_routes() -> Router<ApiState> {
    Router::new()
        .route("/api/v1/chutes", get(chutes::list).post(chutes::create))
        .route("/api/v1/chutes/", get(chutes::list).post(chutes::create))
        .route(
            "/api/v1/chutes/{name}",
            get(chutes::get).put(chutes::update).delete(chutes::delete),
        )
        .route("/api/v1/chutes/{name}/start", post(chutes::start))
        .route("/api/v1/chutes/{name}/stop", post(chutes::stop))
        .route("/api/v1/chutes/{name}/restart", post(chutes::restart))
        .route("/api/v1/chutes/{name}/cache", get(chutes::cache))
        .route("/api/v1/chutes/{name}/networks", get(chutes::networks))
        .route("/api/v1/chutes/{name}/networks/{iface}", get(chutes::network))
        .route("/api/v1/chutes/{name}/networks/{iface}/ssid", get(chutes::ssid))
        .route("/api/v1/chutes/{name}/networks/{iface}/leases", get(chutes::leases))
        .route(
            "/api/v1/chutes/{name}/networks/{iface}/stations",
            get(chutes::stations),
        )
        .route(
            "/api/v1/chutes/{name}/networks/{iface}/hostapd_status",
            get(chutes::hostapd_status),
        )
        .layer(DefaultBodyLimit::max(MAX_PACKAGE_SIZE))
}

fn config_routes() -> Router<ApiState> {
    Router::new()
        .route(
            "/api/v1/config/hostconfig",
            get(settings::get_hostconfig).put(settings::put_hostconfig),
        )
        .route("/api/v1/config/factoryreset", post(settings::factory_reset))
        .route(
            "/api/v1/config/pdconf",
            get(settings::get_pdconf).put(settings::put_pdconf),
        )
        .route(
            "/api/v1/config/provision",
            get(settings::get_provision).post(settings::provision),
        )
}

/// Every route, behind basic authentication
pub fn router(state: ApiState) -> Router {
    Router::new()
        .merge(chute_routes())
        .merge(config_routes())
        .route("/api/v1/changes", get(changes::list))
        .route("/api/v1/changes/{id}", get(changes::get))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

/// Serve the API on `address` until `handle` shuts it down
pub async fn serve(address: SocketAddr, state: ApiState, handle: Handle) -> Result<(), ApiError> {
    let app = router(state);
    info!("API listening on {address}");
    axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| {
            error!("API server error: {e}");
            ApiError::Internal(format!("API server on {address}: {e}"))
        })
}
