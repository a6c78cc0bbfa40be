//! Tower configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```
//! use atcbus::config::TowerConfig;
//!
//! let config = TowerConfig::from_json(r#"{"data_port": 9000, "release_on_declare": true}"#).unwrap();
//! assert_eq!(config.data_port, 9000);
//! assert_eq!(config.control_port, 7071);
//! ```

use crate::arbiter::{ArbiterConfig, ControlInputs, RUNWAY_OVERRIDE_MASK};
use crate::link::LinkSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_DATA_PORT: u16 = 7070;
pub const DEFAULT_CONTROL_PORT: u16 = 7071;
const DEFAULT_REPLY_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TowerConfig {
    pub host: alloc::string::String,
    /// Raw packet bytes, one TCP stream per aircraft console.
    pub data_port: u16,
    /// Line-delimited JSON control commands.
    pub control_port: u16,
    pub link: LinkSettings,
    /// Control inputs at power-on.
    pub controls: ControlInputs,
    pub release_on_declare: bool,
    /// Depth of the reply broadcast shared by data clients.
    pub reply_buffer: usize,
}

impl Default for TowerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            data_port: DEFAULT_DATA_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            link: LinkSettings::default(),
            controls: ControlInputs::default(),
            release_on_declare: false,
            reply_buffer: DEFAULT_REPLY_BUFFER,
        }
    }
}

impl TowerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controls.runway_override > RUNWAY_OVERRIDE_MASK {
            return Err(ConfigError::Invalid(alloc::format!(
                "runway_override {:#04b} exceeds mask {:#04b}",
                self.controls.runway_override,
                RUNWAY_OVERRIDE_MASK
            )));
        }
        if self.link.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be non-zero".into()));
        }
        if self.data_port != 0 && self.data_port == self.control_port {
            return Err(ConfigError::Invalid("data_port and control_port must differ".into()));
        }
        if self.reply_buffer == 0 {
            return Err(ConfigError::Invalid("reply_buffer must be non-zero".into()));
        }
        Ok(())
    }

    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig {
            release_on_declare: self.release_on_declare,
        }
    }

    pub fn data_addr(&self) -> alloc::string::String {
        alloc::format!("{}:{}", self.host, self.data_port)
    }

    pub fn control_addr(&self) -> alloc::string::String {
        alloc::format!("{}:{}", self.host, self.control_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {reason}")]
    Read { path: alloc::string::String, reason: alloc::string::String },
    #[error("Invalid config JSON: {0}")]
    Parse(alloc::string::String),
    #[error("Invalid config: {0}")]
    Invalid(alloc::string::String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TowerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.data_addr(), "127.0.0.1:7070");
        assert!(!config.arbiter_config().release_on_declare);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = TowerConfig::from_json(r#"{"controls": {"runway_override": 1}}"#).unwrap();
        assert_eq!(config.controls.runway_override, 1);
        assert!(!config.controls.emergency_override);
        assert_eq!(config.link, LinkSettings::default());
    }

    #[test]
    fn test_rejects_bad_override_mask() {
        let result = TowerConfig::from_json(r#"{"controls": {"runway_override": 4}}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_shared_ports() {
        let result = TowerConfig::from_json(r#"{"data_port": 8000, "control_port": 8000}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(TowerConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = TowerConfig::load("/nonexistent/atcbus.json");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
