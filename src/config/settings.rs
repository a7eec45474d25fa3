use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::utils::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "spm1_mqtt.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Field bus
    pub rs485: SerialConfig,

    // Site identification and polled devices
    pub place: PlaceConfig,

    // Broker
    pub mqtt: MqttConfig,

    // Cycle timing and delivery batching
    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_byte_size")]
    pub byte_size: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    /// Per-frame read timeout.
    #[serde(default = "default_serial_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParityConfig {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceConfig {
    #[serde(default = "default_place")]
    pub place: String,
    #[serde(default)]
    pub device_ids: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub topic: String,
    /// Empty means a random `spm-bridge-<uuid>` id per connection.
    #[serde(default)]
    pub client_id: String,
    /// PEM bundle to trust instead of the system roots.
    #[serde(default)]
    pub ca_file: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_sleep_time_secs")]
    pub sleep_time_secs: f64,
    /// Upper bound of records published per flush.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Sent rows kept after each flush.
    #[serde(default = "default_retain_sent")]
    pub retain_sent: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            sleep_time_secs: default_sleep_time_secs(),
            max_batch: default_max_batch(),
            retain_sent: default_retain_sent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_true")]
    pub enable_wal: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// OFF, NORMAL or FULL. FULL makes every enqueue survive power loss.
    #[serde(default = "default_sync_mode")]
    pub sync_mode: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            enable_wal: true,
            busy_timeout_ms: default_busy_timeout_ms(),
            sync_mode: default_sync_mode(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_directory")]
    pub directory: String,
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_keep_files")]
    pub keep_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
            file_prefix: default_log_prefix(),
            keep_files: default_keep_files(),
        }
    }
}

fn default_baud_rate() -> u32 { 9600 }
fn default_byte_size() -> u8 { 8 }
fn default_stop_bits() -> u8 { 1 }
fn default_serial_timeout_ms() -> u64 { 1000 }
fn default_place() -> String { "UNKNOWN".to_string() }
fn default_mqtt_port() -> u16 { 8883 }
fn default_keep_alive_secs() -> u64 { 60 }
fn default_connect_timeout_secs() -> u64 { 10 }
fn default_ack_timeout_secs() -> u64 { 10 }
fn default_sleep_time_secs() -> f64 { 60.0 }
fn default_max_batch() -> usize { 100 }
fn default_retain_sent() -> u32 { 5000 }
fn default_database_path() -> String { "spm1_queue.db".to_string() }
fn default_true() -> bool { true }
fn default_busy_timeout_ms() -> u64 { 5000 }
fn default_sync_mode() -> String { "FULL".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_directory() -> String { "logs".to_string() }
fn default_log_prefix() -> String { "spm1_data".to_string() }
fn default_keep_files() -> usize { 7 }

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.place.device_ids.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        if let Some(&bad) = self.place.device_ids.iter().find(|&&id| id == 0 || id > 247) {
            return Err(ConfigError::Invalid {
                field: "place.device_ids",
                reason: format!("{} is not a Modbus slave address (1-247)", bad),
            });
        }
        if !(5..=8).contains(&self.rs485.byte_size) {
            return Err(ConfigError::Invalid {
                field: "rs485.byte_size",
                reason: format!("{} (expected 5-8)", self.rs485.byte_size),
            });
        }
        if !(1..=2).contains(&self.rs485.stop_bits) {
            return Err(ConfigError::Invalid {
                field: "rs485.stop_bits",
                reason: format!("{} (expected 1 or 2)", self.rs485.stop_bits),
            });
        }
        if self.mqtt.topic.is_empty() {
            return Err(ConfigError::Invalid {
                field: "mqtt.topic",
                reason: "must not be empty".to_string(),
            });
        }
        if self.poll.max_batch == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.max_batch",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.poll.sleep_time_secs.is_finite() || self.poll.sleep_time_secs < 0.0 {
            return Err(ConfigError::Invalid {
                field: "poll.sleep_time_secs",
                reason: format!("{}", self.poll.sleep_time_secs),
            });
        }
        if !matches!(self.storage.sync_mode.to_uppercase().as_str(), "OFF" | "NORMAL" | "FULL") {
            warn!("⚠️  Unknown storage.sync_mode '{}', FULL will be used", self.storage.sync_mode);
        }
        Ok(())
    }
}

impl MqttConfig {
    pub fn effective_client_id(&self) -> String {
        if self.client_id.is_empty() {
            format!("spm-bridge-{}", Uuid::new_v4().simple())
        } else {
            self.client_id.clone()
        }
    }
}
