// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! API errors and their HTTP rendering

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chute::ChuteError;
use config::ConfigError;
use confd::ConfdError;
use exec::ExecutionError;
use serde::Serialize;
use tracing::warn;
use update::UpdateError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Authentication required")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {self}");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::Unauthorized) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"paradrop\""),
            );
        }
        response
    }
}

impl From<UpdateError> for ApiError {
    fn from(e: UpdateError) -> Self {
        if e.is_validation() {
            ApiError::BadRequest(e.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<ChuteError> for ApiError {
    fn from(e: ChuteError) -> Self {
        if e.is_validation() {
            ApiError::BadRequest(e.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Validation(_)
            | ConfigError::InterfaceName(_)
            | ConfigError::MissingSection(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ConfdError> for ApiError {
    fn from(e: ConfdError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<ExecutionError> for ApiError {
    fn from(e: ExecutionError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let invalid: ApiError = UpdateError::Validation("no name".to_string()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        let exhausted: ApiError = UpdateError::ResourceExhausted("subnets".to_string()).into();
        assert_eq!(exhausted.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let unsafe_path: ApiError = ChuteError::UnsafePath("../etc".to_string()).into();
        assert_eq!(unsafe_path.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unauthorized_asks_for_credentials() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }
}
