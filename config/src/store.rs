// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Persistence of the host configuration

use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysfs::NetProbe;
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::generate::generate_host_config;
use crate::hostconfig::HostConfig;

/// Reads and writes the host configuration file. Writers hold an advisory lock on a sibling
/// `.lock` file and replace the file atomically.
pub struct HostConfigStore {
    path: PathBuf,
    default_path: Option<PathBuf>,
    probe: Arc<dyn NetProbe>,
}

impl std::fmt::Debug for HostConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConfigStore")
            .field("path", &self.path)
            .field("default_path", &self.default_path)
            .finish_non_exhaustive()
    }
}

impl HostConfigStore {
    #[must_use]
    pub fn new(path: &Path, default_path: Option<&Path>, probe: Arc<dyn NetProbe>) -> Self {
        Self {
            path: path.to_path_buf(),
            default_path: default_path.map(Path::to_path_buf),
            probe,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn probe(&self) -> &Arc<dyn NetProbe> {
        &self.probe
    }

    fn lock(&self) -> Result<Flock<File>, ConfigError> {
        let mut lock_path = self.path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);
        if let Some(dir) = lock_path.parent() {
            std::fs::create_dir_all(dir).map_err(ConfigError::io(dir))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(ConfigError::io(&lock_path))?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, err)| ConfigError::Lock {
            path: lock_path,
            err,
        })
    }

    fn parse(path: &Path) -> Result<HostConfig, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::io(path))?;
        let config = HostConfig::from_yaml(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate the stored configuration, without any fallback
    pub fn read(&self) -> Result<HostConfig, ConfigError> {
        Self::parse(&self.path)
    }

    /// Load the configuration. A missing or invalid file is replaced by one generated from
    /// the hardware.
    pub fn load(&self) -> Result<HostConfig, ConfigError> {
        match self.read() {
            Ok(config) => {
                debug!("Loaded host configuration from {}", self.path.display());
                Ok(config)
            }
            Err(e) => {
                warn!("Host configuration unusable ({e}), regenerating");
                let config = generate_host_config(self.probe.as_ref())?;
                self.save(&config)?;
                Ok(config)
            }
        }
    }

    /// Validate and atomically replace the stored configuration
    pub fn save(&self, config: &HostConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let yaml = config.to_yaml()?;
        let _lock = self.lock()?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = File::create(&tmp).map_err(ConfigError::io(&tmp))?;
            file.write_all(yaml.as_bytes())
                .and_then(|()| file.sync_all())
                .map_err(ConfigError::io(&tmp))?;
        }
        std::fs::rename(&tmp, &self.path).map_err(ConfigError::io(&self.path))?;
        info!("Saved host configuration to {}", self.path.display());
        Ok(())
    }

    /// The factory default: the default file if one is installed, else a configuration
    /// generated from the hardware. Nothing is written.
    pub fn default_config(&self) -> Result<HostConfig, ConfigError> {
        match &self.default_path {
            Some(path) if path.exists() => {
                info!("Using default host configuration {}", path.display());
                Self::parse(path)
            }
            _ => {
                info!("No default host configuration, generating one from hardware");
                generate_host_config(self.probe.as_ref())
            }
        }
    }

    /// Replace the current configuration with the factory default
    pub fn factory_reset(&self) -> Result<HostConfig, ConfigError> {
        let config = self.default_config()?;
        self.save(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sysfs::{Bus, DeviceKind, NetDevice, StaticProbe};
    use tracing_test::traced_test;

    fn probe() -> Arc<dyn NetProbe> {
        Arc::new(
            StaticProbe::new(vec![
                NetDevice::new("eth0", "00:00:00:00:00:01", DeviceKind::Wired, Bus::Pci),
                NetDevice::new("eth1", "00:00:00:00:00:02", DeviceKind::Wired, Bus::Pci),
                NetDevice::new("wlan0", "00:00:00:00:00:03", DeviceKind::Wireless, Bus::Pci),
            ])
            .with_default_route("eth0", "10.0.0.2/24".parse().unwrap()),
        )
    }

    #[test]
    #[traced_test]
    fn missing_file_is_generated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostconfig.yaml");
        let store = HostConfigStore::new(&path, None, probe());
        let config = store.load().expect("Should succeed");
        assert!(path.exists());
        assert_eq!(store.read().expect("Should succeed"), config);
        assert!(logs_contain("regenerating"));
    }

    #[test]
    fn corrupt_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostconfig.yaml");
        std::fs::write(&path, "wan: {interface: eth0}\n").unwrap();
        let store = HostConfigStore::new(&path, None, probe());
        assert!(store.read().is_err());
        let config = store.load().expect("Should succeed");
        assert_eq!(config.wan.interface, "eth0");
        assert!(store.read().is_ok());
    }

    #[test]
    fn save_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostconfig.yaml");
        let store = HostConfigStore::new(&path, None, probe());
        let mut config = store.load().unwrap();
        let before = std::fs::read_to_string(&path).unwrap();
        config.lan.interfaces.push("eth0".to_string());
        assert!(store.save(&config).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn factory_reset_prefers_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostconfig.yaml");
        let default = dir.path().join("hostconfig.default.yaml");
        let store = HostConfigStore::new(&path, Some(&default), probe());

        let mut generated = store.load().unwrap();
        generated.wifi[0].channel = 11;
        std::fs::write(&default, generated.to_yaml().unwrap()).unwrap();
        let mut current = generated.clone();
        current.wifi[0].channel = 6;
        store.save(&current).unwrap();

        let reset = store.factory_reset().expect("Should succeed");
        assert_eq!(reset.wifi[0].channel, 11);
        assert_eq!(store.read().unwrap(), reset);

        std::fs::remove_file(&default).unwrap();
        let reset = store.factory_reset().expect("Should succeed");
        assert_eq!(reset.wifi[0].channel, 1);
    }
}
