// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! What operations work on: the agent's shared services and the state of one update

use chute::{Chute, ChuteCatalog};
use config::{HostConfig, HostConfigStore, Settings};
use confd::ConfigManager;
use exec::Runner;
use std::collections::BTreeMap;
use std::sync::Arc;
use uci::{HOST_OWNER, UciConfigDir, UciFile, UciSection};

use crate::errors::UpdateError;
use crate::prio;
use crate::reservations::{Allocation, Pools, Reservations};
use crate::runtime::ContainerRuntime;
use crate::update::{UpdateClass, UpdateRequest, UpdateType};

/// The UCI files updates write
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ConfFile {
    Network,
    Wireless,
    Firewall,
    Dhcp,
    Qos,
}

impl ConfFile {
    pub const ALL: [ConfFile; 5] = [
        ConfFile::Network,
        ConfFile::Wireless,
        ConfFile::Firewall,
        ConfFile::Dhcp,
        ConfFile::Qos,
    ];

    #[must_use]
    pub fn set_priority(self) -> i32 {
        match self {
            ConfFile::Network => prio::SET_NETWORK,
            ConfFile::Wireless => prio::SET_WIRELESS,
            ConfFile::Firewall => prio::SET_FIREWALL,
            ConfFile::Dhcp => prio::SET_DHCP,
            ConfFile::Qos => prio::SET_QOS,
        }
    }

    #[must_use]
    pub fn reload_priority(self) -> i32 {
        match self {
            ConfFile::Network => prio::RELOAD_NETWORK,
            ConfFile::Wireless => prio::RELOAD_WIRELESS,
            ConfFile::Firewall => prio::RELOAD_FIREWALL,
            ConfFile::Dhcp => prio::RELOAD_DHCP,
            ConfFile::Qos => prio::RELOAD_QOS,
        }
    }
}

/// Services shared by every update
pub struct UpdateEnv {
    pub settings: Settings,
    pub catalog: Arc<ChuteCatalog>,
    pub host_store: Arc<HostConfigStore>,
    pub uci: UciConfigDir,
    pub confd: Arc<ConfigManager>,
    pub runner: Runner,
    pub runtime: Arc<dyn ContainerRuntime>,
}

/// The state of one update while it runs
pub struct UpdateContext {
    pub env: Arc<UpdateEnv>,
    pub kind: UpdateType,
    pub name: String,
    /// Host configuration carried by a `sethostconfig`
    pub requested_host: Option<HostConfig>,
    /// The chute as it will be once the update succeeds
    pub chute: Chute,
    /// The chute as it was, if installed
    pub old: Option<Arc<Chute>>,
    /// Host configuration the update works with
    pub host: Option<HostConfig>,
    /// Host configuration to restore on abort
    pub previous_host: Option<HostConfig>,
    pub pools: Pools,
    /// Pools as they were before a host configuration change rebuilt them
    pub previous_pools: Option<Pools>,
    pub reservations: Reservations,
    /// Pool items taken by this update
    pub allocations: Vec<Allocation>,
    /// Sections of the update's owner, per file
    pub sections: BTreeMap<ConfFile, Vec<UciSection>>,
    /// Files as they were before the update wrote them
    pub snapshots: BTreeMap<ConfFile, UciFile>,
}

impl UpdateContext {
    #[must_use]
    pub fn new(env: Arc<UpdateEnv>, request: &UpdateRequest, pools: Pools) -> Self {
        let old = match request.class() {
            UpdateClass::Chute => env.catalog.get(&request.name),
            UpdateClass::Router => None,
        };
        let mut chute = request
            .chute
            .clone()
            .unwrap_or_else(|| Chute::named(&request.name));
        if let Some(old) = &old
            && !request.kind.installs()
        {
            /* a request by name inherits everything from the installed chute */
            chute.merge_from(old);
            chute.state = old.state;
            chute.cache.images.clone_from(&old.cache.images);
            chute.cache.containers.clone_from(&old.cache.containers);
            chute.cache.web_url.clone_from(&old.cache.web_url);
        }
        Self {
            env,
            kind: request.kind,
            name: request.name.clone(),
            requested_host: request.hostconfig.clone(),
            chute,
            old,
            host: None,
            previous_host: None,
            pools,
            previous_pools: None,
            reservations: Reservations::default(),
            allocations: vec![],
            sections: BTreeMap::new(),
            snapshots: BTreeMap::new(),
        }
    }

    /// Owner tag of the sections this update writes
    #[must_use]
    pub fn owner(&self) -> &str {
        match self.kind.class() {
            UpdateClass::Chute => &self.chute.name,
            UpdateClass::Router => HOST_OWNER,
        }
    }

    /// Whether the chute runs once the update succeeds
    #[must_use]
    pub fn deploys(&self) -> bool {
        self.kind.class() == UpdateClass::Chute
            && self.kind.target_state() == Some(chute::ChuteState::Running)
    }

    #[must_use]
    pub fn removes(&self) -> bool {
        self.kind == UpdateType::Delete
    }

    /// The host configuration loaded for this update
    pub fn host(&self) -> Result<&HostConfig, UpdateError> {
        self.host
            .as_ref()
            .ok_or_else(|| UpdateError::Validation("host configuration not loaded".to_string()))
    }

    /// Return the pools to the worker
    #[must_use]
    pub fn into_pools(self) -> Pools {
        self.pools
    }
}
