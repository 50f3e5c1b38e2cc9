// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Confd errors

use uci::UciError;

use crate::section::SectionKey;

#[derive(Debug, thiserror::Error)]
pub enum ConfdError {
    #[error(transparent)]
    Uci(#[from] UciError),
    #[error("{key}: missing option '{option}'")]
    MissingOption { key: SectionKey, option: String },
    #[error("{key}: bad value '{value}' for option '{option}'")]
    BadValue {
        key: SectionKey,
        option: String,
        value: String,
    },
    #[error("{key}: {reason}")]
    Invalid { key: SectionKey, reason: String },
    #[error("{key}: unresolved dependency {dependency}")]
    MissingDependency { key: SectionKey, dependency: String },
    #[error("I/O error on {path}: {err}")]
    Io { path: String, err: std::io::Error },
}
