// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Agent-wide settings

use exec::CommandTimeouts;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::errors::ConfigError;

/// Paths, limits and policies of the agent. Every field has a default, so a settings file
/// only needs to carry what differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub home_dir: PathBuf,
    pub uci_config_dir: PathBuf,
    pub write_dir: PathBuf, /* generated daemon configs, pid and lease files */
    pub host_config_file: PathBuf,
    pub default_host_config_file: Option<PathBuf>, /* factory default, if shipped */
    pub chute_domain: String,
    pub reject_downgrade: bool,
    pub max_ap_interfaces: usize, /* per radio */
    pub interface_number_space: u32,
    pub runtime_retries: u32,
    pub runtime_retry_delay: f64, /* seconds, doubled on each retry */
    pub reboot_on_runtime_failure: bool,
    pub command_timeouts: CommandTimeouts,
    pub container_runtime: String,
    pub api_address: SocketAddr,
    pub password_file: Option<PathBuf>,
    pub catalog_flush_interval: f64, /* seconds */
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from("/var/lib/paradrop"),
            uci_config_dir: PathBuf::from("/etc/config"),
            write_dir: PathBuf::from("/var/run/pdconfd"),
            host_config_file: PathBuf::from("/etc/paradrop/hostconfig.yaml"),
            default_host_config_file: None,
            chute_domain: "paradrop.org".to_string(),
            reject_downgrade: true,
            max_ap_interfaces: 8,
            interface_number_space: 10000,
            runtime_retries: 5,
            runtime_retry_delay: 2.0,
            reboot_on_runtime_failure: false,
            command_timeouts: CommandTimeouts::default(),
            container_runtime: "docker".to_string(),
            api_address: SocketAddr::from(([0, 0, 0, 0], 80)),
            password_file: None,
            catalog_flush_interval: 30.0,
        }
    }
}

impl Settings {
    /// Settings with every path rooted under `home`
    #[must_use]
    pub fn with_home(home: &Path) -> Self {
        Self {
            home_dir: home.to_path_buf(),
            uci_config_dir: home.join("uci"),
            write_dir: home.join("run"),
            host_config_file: home.join("hostconfig.yaml"),
            ..Default::default()
        }
    }

    /// Load settings from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::io(path))?;
        let settings: Settings =
            serde_yaml_ng::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        settings.validate()?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_ap_interfaces == 0 {
            return Err(ConfigError::Validation(
                "max_ap_interfaces must be at least 1".to_string(),
            ));
        }
        if self.interface_number_space == 0 || self.interface_number_space > 10000 {
            return Err(ConfigError::Validation(format!(
                "interface_number_space must be in [1, 10000], got {}",
                self.interface_number_space
            )));
        }
        if self.chute_domain.is_empty() {
            return Err(ConfigError::Validation("chute_domain is empty".to_string()));
        }
        Ok(())
    }

    /// Agent identity, written on provisioning
    #[must_use]
    pub fn identity_file(&self) -> PathBuf {
        self.home_dir.join("config")
    }
    #[must_use]
    pub fn catalog_file(&self) -> PathBuf {
        self.home_dir.join("chutes")
    }
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }
    /// Extracted chute packages
    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.home_dir.join("sources")
    }
    #[must_use]
    pub fn password_path(&self) -> PathBuf {
        self.password_file
            .clone()
            .unwrap_or_else(|| self.home_dir.join("password"))
    }
    #[must_use]
    pub fn catalog_flush_period(&self) -> Duration {
        Duration::from_secs_f64(self.catalog_flush_interval.max(1.0))
    }
    #[must_use]
    pub fn runtime_retry_base(&self) -> Duration {
        Duration::from_secs_f64(self.runtime_retry_delay.max(0.0))
    }
}
