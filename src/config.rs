use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AttenuatorError, Result};
use crate::scpi::DEFAULT_CHANNEL_COUNT;

pub const MINI_CIRCUITS_VENDOR_ID: u16 = 0x20CE;
pub const ATTENUATOR_PRODUCT_ID: u16 = 0x0023;

/// Settings for locating and talking to an attenuator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttenuatorConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Only open the device reporting this serial number
    pub serial: Option<String>,
    /// Timeout applied to every USB transfer, in milliseconds
    pub timeout_ms: u64,
    pub channels: u8,
}

impl Default for AttenuatorConfig {
    fn default() -> Self {
        Self {
            vendor_id: MINI_CIRCUITS_VENDOR_ID,
            product_id: ATTENUATOR_PRODUCT_ID,
            serial: None,
            timeout_ms: 1000,
            channels: DEFAULT_CHANNEL_COUNT,
        }
    }
}

impl AttenuatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(AttenuatorError::Config(
                "channels must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(AttenuatorError::Config(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from a JSON file. Missing fields take their defaults.
pub fn load_config(path: &Path) -> Result<AttenuatorConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AttenuatorError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let config: AttenuatorConfig = serde_json::from_str(&contents).map_err(|e| {
        AttenuatorError::Config(format!("cannot parse {}: {}", path.display(), e))
    })?;
    config.validate()?;
    log::info!("Loaded configuration from {}", path.display());
    Ok(config)
}
