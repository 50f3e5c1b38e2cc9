// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Chute errors

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ChuteError {
    #[error("Invalid chute: {0}")]
    Validation(String),
    #[error("Unsafe path in package: {0}")]
    UnsafePath(String),
    #[error("Package has no top-level paradrop.yaml")]
    MissingManifest,
    #[error("Failed to parse chute description: {0}")]
    Parse(String),
    #[error("Failed to read package: {0}")]
    Tar(std::io::Error),
    #[error("I/O error on {}: {err}", path.display())]
    Io { path: PathBuf, err: std::io::Error },
    #[error("Catalog encoding error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ChuteError {
    /// Whether the error is the caller's fault
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChuteError::Validation(_)
                | ChuteError::UnsafePath(_)
                | ChuteError::MissingManifest
                | ChuteError::Parse(_)
                | ChuteError::Tar(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ChuteError {
        let path = path.into();
        move |err| ChuteError::Io { path, err }
    }
}
