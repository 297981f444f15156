//! Configuration management for cardsmith.

use crate::error::ConfigError;
use crate::types::ApplicationId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Highest file number a DESFire application can hold.
pub const MAX_FILE_ID: u8 = 31;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Owner-name file; provisioning skips it when absent
    #[serde(default)]
    pub owner_file: Option<OwnerFileConfig>,
    #[serde(default)]
    pub events: EventsConfig,
}

/// Layout of the application created during provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub aid: ApplicationId,
    /// Marker stored alongside the rotated key
    pub key_version: u8,
    pub secret_file_id: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerFileConfig {
    pub file_id: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer per subscriber
    pub capacity: usize,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            aid: ApplicationId::from_le_bytes([0xAC, 0x84, 0x19]),
            key_version: 0x42,
            secret_file_id: 1,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            application: ApplicationConfig::default(),
            owner_file: None,
            events: EventsConfig::default(),
        }
    }

    /// Reject layouts that cannot be created on a card.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application.aid.is_picc() {
            return Err(ConfigError::Invalid(
                "application aid must not be the PICC (000000)".to_string(),
            ));
        }
        if self.application.secret_file_id > MAX_FILE_ID {
            return Err(ConfigError::Invalid(format!(
                "secret_file_id {} exceeds {}",
                self.application.secret_file_id, MAX_FILE_ID
            )));
        }
        if let Some(owner) = &self.owner_file {
            if owner.file_id > MAX_FILE_ID {
                return Err(ConfigError::Invalid(format!(
                    "owner_file.file_id {} exceeds {}",
                    owner.file_id, MAX_FILE_ID
                )));
            }
            if owner.file_id == self.application.secret_file_id {
                return Err(ConfigError::Invalid(
                    "owner_file.file_id collides with secret_file_id".to_string(),
                ));
            }
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid("events.capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
