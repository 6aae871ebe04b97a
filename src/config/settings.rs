//! Client settings

use super::ConfigError;
use crate::core::database::DatabaseLayout;
use crate::core::parameter::{ParameterCatalog, ParameterIdMap};
use crate::core::protocol::corus::{DEFAULT_FIELD_MASK, DEFAULT_WAKEUP_LENGTH};
use crate::core::protocol::framing::MAX_PAYLOAD;
use crate::core::protocol::ChecksumType;
use crate::core::session::SessionConfig;
use crate::core::transport::{TcpConfig, TransportConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-receive timeout in milliseconds
    pub timeout_ms: u64,
    /// Number of wake-up bytes
    pub wakeup_length: usize,
    /// Largest request payload
    pub max_payload: usize,
    /// Frame checksum algorithm
    pub checksum: ChecksumType,
    /// Database field mask as 8 hex digits
    pub field_mask: String,
    /// Pulse weight override, skips reading it from the device
    pub input_pulse_weight: Option<Decimal>,
    /// How to reach the device
    pub transport: TransportConfig,
    /// Log settings for the CLI
    pub logging: LoggingConfig,
    /// Parameter maps per firmware
    pub firmware: Vec<FirmwareEntry>,
    /// Database record layouts
    pub layouts: DatabaseLayout,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            wakeup_length: DEFAULT_WAKEUP_LENGTH,
            max_payload: MAX_PAYLOAD,
            checksum: ChecksumType::default(),
            field_mask: hex::encode(DEFAULT_FIELD_MASK),
            input_pulse_weight: None,
            transport: TransportConfig::Tcp(TcpConfig::default()),
            logging: LoggingConfig::default(),
            firmware: Vec::new(),
            layouts: DatabaseLayout::default(),
        }
    }
}

impl ClientConfig {
    /// Load from the default location; a missing file gives the defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        super::init_directories()?;
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save to a file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Per-receive timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Decoded database field mask
    pub fn field_mask(&self) -> Result<[u8; 4], ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            field: "field_mask",
            reason,
        };
        let bytes = hex::decode(self.field_mask.trim()).map_err(|e| invalid(e.to_string()))?;
        <[u8; 4]>::try_from(bytes.as_slice())
            .map_err(|_| invalid(format!("expected 4 bytes, got {}", bytes.len())))
    }

    /// Parameter catalog built from the `[[firmware]]` entries
    pub fn catalog(&self) -> ParameterCatalog {
        self.firmware
            .iter()
            .fold(ParameterCatalog::new(), |catalog, entry| {
                catalog.with(entry.firmware.clone(), entry.parameters.clone())
            })
    }

    /// Session settings
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        if self.wakeup_length == 0 {
            return Err(ConfigError::Invalid {
                field: "wakeup_length",
                reason: "must be at least 1".into(),
            });
        }

        let mut config = SessionConfig::default()
            .with_timeout(self.timeout())
            .with_max_payload(self.max_payload)
            .with_catalog(self.catalog())
            .with_layout(self.layouts.clone());
        config.wakeup_length = self.wakeup_length;
        config.checksum = self.checksum;
        config.field_mask = self.field_mask()?;
        config.input_pulse_weight = self.input_pulse_weight;
        Ok(config)
    }
}

/// Parameter map for one firmware version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareEntry {
    /// Firmware string as read from the device
    pub firmware: String,
    /// Name to parameter map
    pub parameters: ParameterIdMap,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
