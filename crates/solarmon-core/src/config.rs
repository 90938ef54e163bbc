//! Runtime configuration.
//!
//! The configuration is a TOML document loaded once at process start. Only
//! `allowed_devices` is required; every other section falls back to the
//! defaults in [`crate::constants`].
//!
//! ```toml
//! [[allowed_devices]]
//! local_name = "Andrii 1"
//! address = "c8:47:80:12:9b:46"
//!
//! [[allowed_devices]]
//! local_name = "Andrii 2"
//!
//! [connect]
//! max_attempts = 5
//! initial_delay_ms = 2000
//! max_delay_ms = 10000
//!
//! [telegram]
//! chat_id = "-1001234567890"
//! ```

use crate::{
    AllowList, AllowedDevice, Error, GattUuid, Result,
    constants::*,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Permitted devices.
    pub allowed_devices: Vec<AllowedDevice>,

    #[serde(default)]
    pub gatt: GattConfig,

    #[serde(default)]
    pub connect: ConnectConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Devices allowed to establish a connection at the same time.
    #[serde(default = "default_max_concurrent_connects")]
    pub max_concurrent_connects: usize,

    /// How long a failed device is skipped by discovery.
    #[serde(default = "default_failed_cooldown_ms")]
    pub failed_cooldown_ms: u64,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub events: EventsConfig,

    /// Telegram channel, when notifications should leave the process.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

impl Config {
    /// Create a configuration with defaults for the given allow list.
    pub fn new(allowed_devices: Vec<AllowedDevice>) -> Self {
        Self {
            allowed_devices,
            gatt: GattConfig::default(),
            connect: ConnectConfig::default(),
            reconnect: ReconnectConfig::default(),
            max_concurrent_connects: DEFAULT_MAX_CONCURRENT_CONNECTS,
            failed_cooldown_ms: DEFAULT_FAILED_COOLDOWN_MS,
            protocol: ProtocolConfig::default(),
            events: EventsConfig::default(),
            telegram: None,
        }
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns `Error::Config` on syntax errors or failed validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read, otherwise as
    /// [`Config::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.allow_list()?;

        if self.connect.max_attempts == 0 {
            return Err(Error::Config("connect.max_attempts must be at least 1".to_string()));
        }
        if self.connect.initial_delay_ms == 0 || self.reconnect.delay_ms == 0 {
            return Err(Error::Config(
                "connect.initial_delay_ms and reconnect.delay_ms must be non-zero".to_string(),
            ));
        }
        if self.connect.initial_delay_ms > self.connect.max_delay_ms {
            return Err(Error::Config(
                "connect.initial_delay_ms must not exceed connect.max_delay_ms".to_string(),
            ));
        }
        if self.max_concurrent_connects == 0 {
            return Err(Error::Config("max_concurrent_connects must be at least 1".to_string()));
        }
        if self.events.battery_low_threshold > 100 {
            return Err(Error::Config(
                "events.battery_low_threshold must be a percentage".to_string(),
            ));
        }
        if let Some(telegram) = &self.telegram
            && telegram.chat_id.trim().is_empty()
        {
            return Err(Error::MissingConfig("telegram.chat_id".to_string()));
        }
        Ok(())
    }

    /// Build the allow list from the configured entries.
    ///
    /// # Errors
    /// See [`AllowList::new`].
    pub fn allow_list(&self) -> Result<AllowList> {
        AllowList::new(self.allowed_devices.clone())
    }

    /// Cooldown applied to failed devices.
    #[must_use]
    pub fn failed_cooldown(&self) -> Duration {
        Duration::from_millis(self.failed_cooldown_ms)
    }
}

/// GATT identifiers of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GattConfig {
    /// BMS data characteristic (notify + write).
    #[serde(default = "default_data_characteristic")]
    pub data_characteristic: GattUuid,

    /// Standard Battery Level characteristic.
    #[serde(default = "default_battery_level_characteristic")]
    pub battery_level_characteristic: GattUuid,
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            data_characteristic: default_data_characteristic(),
            battery_level_characteristic: default_battery_level_characteristic(),
        }
    }
}

/// Initial connect retry policy (capped exponential backoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectConfig {
    #[serde(default = "default_connect_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_connect_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_connect_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl ConnectConfig {
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            initial_delay_ms: DEFAULT_CONNECT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_CONNECT_MAX_DELAY_MS,
        }
    }
}

/// Reconnect policy after an unsolicited disconnect (fixed delay).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
}

impl ReconnectConfig {
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

/// Initialization command selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitCommand {
    DeviceInfo,
    CellInfo,
}

/// BMS protocol options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Commands written after subscribing to the data characteristic.
    #[serde(default = "default_init_commands")]
    pub init_commands: Vec<InitCommand>,

    #[serde(default = "default_command_interval_ms")]
    pub command_interval_ms: u64,
}

impl ProtocolConfig {
    #[must_use]
    pub fn command_interval(&self) -> Duration {
        Duration::from_millis(self.command_interval_ms)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            init_commands: default_init_commands(),
            command_interval_ms: DEFAULT_COMMAND_INTERVAL_MS,
        }
    }
}

/// Domain event options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    #[serde(default = "default_battery_low_threshold")]
    pub battery_low_threshold: u8,

    /// Minimum spacing between average voltage reports per device; 0 reports every frame.
    #[serde(default = "default_voltage_report_interval_ms")]
    pub voltage_report_interval_ms: u64,
}

impl EventsConfig {
    #[must_use]
    pub fn voltage_report_interval(&self) -> Duration {
        Duration::from_millis(self.voltage_report_interval_ms)
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            battery_low_threshold: DEFAULT_BATTERY_LOW_THRESHOLD,
            voltage_report_interval_ms: DEFAULT_VOLTAGE_REPORT_INTERVAL_MS,
        }
    }
}

/// Telegram channel settings. The bot token comes from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    pub chat_id: String,

    #[serde(default)]
    pub silent_by_default: bool,
}

fn default_data_characteristic() -> GattUuid {
    GattUuid::from_short(DEFAULT_DATA_CHARACTERISTIC)
}

fn default_battery_level_characteristic() -> GattUuid {
    GattUuid::from_short(DEFAULT_BATTERY_LEVEL_CHARACTERISTIC)
}

fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

fn default_connect_initial_delay_ms() -> u64 {
    DEFAULT_CONNECT_INITIAL_DELAY_MS
}

fn default_connect_max_delay_ms() -> u64 {
    DEFAULT_CONNECT_MAX_DELAY_MS
}

fn default_reconnect_attempts() -> u32 {
    DEFAULT_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_max_concurrent_connects() -> usize {
    DEFAULT_MAX_CONCURRENT_CONNECTS
}

fn default_failed_cooldown_ms() -> u64 {
    DEFAULT_FAILED_COOLDOWN_MS
}

fn default_init_commands() -> Vec<InitCommand> {
    vec![InitCommand::DeviceInfo, InitCommand::CellInfo]
}

fn default_command_interval_ms() -> u64 {
    DEFAULT_COMMAND_INTERVAL_MS
}

fn default_battery_low_threshold() -> u8 {
    DEFAULT_BATTERY_LOW_THRESHOLD
}

fn default_voltage_report_interval_ms() -> u64 {
    DEFAULT_VOLTAGE_REPORT_INTERVAL_MS
}
