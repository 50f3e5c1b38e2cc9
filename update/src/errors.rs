// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Update errors

use chute::ChuteError;
use config::ConfigError;
use confd::ConfdError;
use exec::ExecutionError;
use pool::PoolError;
use uci::UciError;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// Bad input: rejected before the update is queued, or when planning
    #[error("Invalid update: {0}")]
    Validation(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Missing hardware: {0}")]
    MissingHardware(String),

    #[error("Section {section} of {file} failed: {reason}")]
    SectionFailed {
        file: String,
        section: String,
        reason: String,
    },

    #[error("Container runtime: {0}")]
    Runtime(String),

    #[error(transparent)]
    Chute(#[from] ChuteError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Confd(#[from] ConfdError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Uci(#[from] UciError),

    #[error("Update manager is shut down")]
    ShutDown,
}

impl From<PoolError> for UpdateError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Exhausted(_) | PoolError::AlreadyReserved(_) => {
                UpdateError::ResourceExhausted(e.to_string())
            }
            other => UpdateError::Validation(other.to_string()),
        }
    }
}

impl UpdateError {
    /// Whether the error is the caller's fault
    #[must_use]
    pub fn is_validation(&self) -> bool {
        match self {
            UpdateError::Validation(_) => true,
            UpdateError::Chute(e) => e.is_validation(),
            UpdateError::Config(e) => matches!(
                e,
                ConfigError::Validation(_)
                    | ConfigError::InterfaceName(_)
                    | ConfigError::MissingSection(_)
            ),
            _ => false,
        }
    }
}
