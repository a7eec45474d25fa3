pub mod settings;

pub use settings::{
    Config,
    LoggingConfig,
    MqttConfig,
    ParityConfig,
    PlaceConfig,
    PollConfig,
    SerialConfig,
    StorageConfig,
    DEFAULT_CONFIG_FILE,
};
