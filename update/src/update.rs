// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Update objects: typed intents submitted to the update manager

use chute::{Chute, ChuteState};
use config::HostConfig;
use serde::{Deserialize, Serialize};

use crate::errors::UpdateError;
use crate::planner::firewall::check_rules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum UpdateClass {
    Chute,
    Router,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateType {
    Create,
    Update,
    Start,
    Stop,
    Restart,
    Delete,
    SetHostConfig,
    FactoryReset,
    InitHostConfig,
}

impl UpdateType {
    #[must_use]
    pub fn class(self) -> UpdateClass {
        match self {
            UpdateType::SetHostConfig | UpdateType::FactoryReset | UpdateType::InitHostConfig => {
                UpdateClass::Router
            }
            _ => UpdateClass::Chute,
        }
    }

    /// Whether the update installs new code (and so builds images)
    #[must_use]
    pub fn installs(self) -> bool {
        matches!(self, UpdateType::Create | UpdateType::Update)
    }

    /// State of the chute once the update succeeds. `None` for a delete.
    #[must_use]
    pub fn target_state(self) -> Option<ChuteState> {
        match self {
            UpdateType::Stop => Some(ChuteState::Stopped),
            UpdateType::Delete => None,
            _ => Some(ChuteState::Running),
        }
    }
}

/// An intent, as submitted
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub kind: UpdateType,
    pub name: String,
    /// The new chute, for create and update. Other chute updates only carry a name.
    pub chute: Option<Chute>,
    pub hostconfig: Option<HostConfig>,
    /// Completion is reported by an external installer, not by the agent
    pub delegated: bool,
}

impl UpdateRequest {
    /// Install or update `chute`
    #[must_use]
    pub fn install(kind: UpdateType, chute: Chute) -> Self {
        Self {
            kind,
            name: chute.name.clone(),
            chute: Some(chute),
            hostconfig: None,
            delegated: false,
        }
    }

    /// Start, stop, restart or delete a chute by name
    #[must_use]
    pub fn chute_named(kind: UpdateType, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            chute: None,
            hostconfig: None,
            delegated: false,
        }
    }

    /// A host configuration update. Only `sethostconfig` carries a configuration.
    #[must_use]
    pub fn host(kind: UpdateType, hostconfig: Option<HostConfig>) -> Self {
        Self {
            kind,
            name: "__HOST__".to_string(),
            chute: None,
            hostconfig,
            delegated: false,
        }
    }

    #[must_use]
    pub fn class(&self) -> UpdateClass {
        self.kind.class()
    }

    /// Reject what can never succeed, before the update is queued
    pub fn validate(&self) -> Result<(), UpdateError> {
        let invalid = |msg: String| Err(UpdateError::Validation(msg));
        match self.kind {
            UpdateType::Create | UpdateType::Update => {
                let Some(chute) = &self.chute else {
                    return invalid(format!("{} of {} without a chute", self.kind, self.name));
                };
                if chute.name != self.name {
                    return invalid(format!("chute {} submitted as {}", chute.name, self.name));
                }
                chute.validate()?;
                if chute.services.is_empty() {
                    return invalid(format!("chute {} has no services", chute.name));
                }
                check_rules(chute)?;
            }
            UpdateType::Start | UpdateType::Stop | UpdateType::Restart | UpdateType::Delete => {
                if self.name.is_empty() {
                    return invalid(format!("{} without a chute name", self.kind));
                }
            }
            UpdateType::SetHostConfig => match &self.hostconfig {
                Some(hostconfig) => hostconfig.validate()?,
                None => return invalid("sethostconfig without a configuration".to_string()),
            },
            UpdateType::FactoryReset | UpdateType::InitHostConfig => {}
        }
        Ok(())
    }
}
