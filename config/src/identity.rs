// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Controller identity of the node, stored under the home directory on provisioning

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub key: String,
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wamp_router: Option<String>,
}

impl Identity {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() || self.key.is_empty() || self.controller.is_empty() {
            return Err(ConfigError::Validation(
                "identity needs id, key and controller".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the stored identity; `None` when the node was never provisioned
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(ConfigError::io(path))?;
        serde_yaml_ng::from_str(&text)
            .map(Some)
            .map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let text =
            serde_yaml_ng::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(ConfigError::io(dir))?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, text).map_err(ConfigError::io(path))?;
        std::fs::rename(&tmp, path).map_err(ConfigError::io(path))?;
        info!("Node provisioned as {} with controller {}", self.id, self.controller);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Identity;

    #[test]
    fn provision_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        assert_eq!(Identity::load(&path).unwrap(), None);
        let identity = Identity {
            id: "5890d8d1".to_string(),
            key: "secret".to_string(),
            controller: "https://paradrop.org".to_string(),
            wamp_router: None,
        };
        identity.save(&path).expect("Should succeed");
        assert_eq!(Identity::load(&path).unwrap(), Some(identity));
        assert!(Identity::default().save(&path).is_err());
    }
}
