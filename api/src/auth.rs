// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Basic authentication of local API users.
//!
//! Credentials come from a password file with one `user:salt:hash` line per user, where
//! `hash` is the hex SHA-256 of the salt followed by the password. Without a password file
//! the node accepts the default user with an empty password.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::errors::ApiError;
use crate::state::ApiState;

pub const DEFAULT_USER: &str = "paradrop";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hashed {
    salt: String,
    hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    users: BTreeMap<String, Hashed>,
}

#[must_use]
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl Default for Credentials {
    fn default() -> Self {
        let mut users = BTreeMap::new();
        users.insert(
            DEFAULT_USER.to_string(),
            Hashed {
                salt: String::new(),
                hash: hash_password("", ""),
            },
        );
        Self { users }
    }
}

impl Credentials {
    /// A password file line for `user`
    #[must_use]
    pub fn entry(user: &str, salt: &str, password: &str) -> String {
        format!("{user}:{salt}:{}", hash_password(salt, password))
    }

    /// Parse a password file. Blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Result<Self, ApiError> {
        let mut users = BTreeMap::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(3, ':');
            let (Some(user), Some(salt), Some(hash)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(ApiError::Internal(format!(
                    "password file line {}: expected user:salt:hash",
                    n + 1
                )));
            };
            if user.is_empty() || hash.len() != 64 {
                return Err(ApiError::Internal(format!("password file line {}: bad entry", n + 1)));
            }
            users.insert(
                user.to_string(),
                Hashed {
                    salt: salt.to_string(),
                    hash: hash.to_lowercase(),
                },
            );
        }
        Ok(Self { users })
    }

    /// Load the password file, or the default credentials when there is none
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        if !path.exists() {
            warn!(
                "No password file at {}, accepting user {DEFAULT_USER} with an empty password",
                path.display()
            );
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Internal(format!("failed to read {}: {e}", path.display())))?;
        let credentials = Self::parse(&text)?;
        info!("Loaded {} API users from {}", credentials.users.len(), path.display());
        Ok(credentials)
    }

    #[must_use]
    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|h| hash_password(&h.salt, password) == h.hash)
    }
}

/// Decode a `Basic` authorization header into user and password
fn basic_credentials(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Middleware rejecting requests without valid credentials
pub async fn require_auth(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let given = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(basic_credentials);
    match given {
        Some((user, password)) if state.credentials.verify(&user, &password) => {
            Ok(next.run(request).await)
        }
        Some((user, _)) => {
            debug!("Rejected credentials of {user} for {}", request.uri());
            Err(ApiError::Unauthorized)
        }
        None => Err(ApiError::Unauthorized),
    }
}
