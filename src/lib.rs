//! SPM-1 Store-and-Forward Bridge
//!
//! Polls SPM-1 power meters over Modbus RTU, commits every reading to a
//! durable SQLite queue, and forwards the queue to an MQTT broker over TLS
//! with at-least-once delivery in strict arrival order.

pub mod cli;
pub mod config;
pub mod modbus;
pub mod devices;
pub mod services;
pub mod output;
pub mod utils;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use devices::{DeviceReader, Reading, RegisterCatalogue};
pub use modbus::{ModbusClient, ModbusClientTrait};
pub use output::{ChannelConnector, MqttConnector, PayloadCodec, PublishChannel};
pub use services::{DeliveryEngine, PollCycle, PollSettings};
pub use storage::{MessageQueue, QueueRecord, QueueStats};
pub use utils::error::{ConfigError, ConnectError, PublishError, StorageError, TransportError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
