use thiserror::Error;

/// Failures of the durable outbound queue.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open queue database {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Migration {version} failed: {reason}")]
    Migration { version: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single field-bus register read.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("CRC checksum mismatch (expected 0x{expected:04X}, got 0x{received:04X})")]
    CrcError { expected: u16, received: u16 },

    #[error("Invalid response from device: {0}")]
    InvalidResponse(String),

    #[error("Modbus exception 0x{code:02X} for function 0x{function:02X}")]
    Exception { function: u8, code: u8 },

    #[error("Lock acquisition failed")]
    LockError,

    #[error("Timeout occurred")]
    Timeout,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            TransportError::Timeout
        } else {
            TransportError::CommunicationError(format!("IO error: {}", err))
        }
    }
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        TransportError::ConnectionError(err.to_string())
    }
}

/// Failures while establishing the broker session.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Failed to read CA certificate {path}: {reason}")]
    TlsMaterial { path: String, reason: String },

    #[error("Broker connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("Broker refused connection: {0}")]
    Refused(String),

    #[error("Timed out after {0}s waiting for CONNACK")]
    Timeout(u64),
}

/// Failures of one acknowledged publish.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Channel is not connected")]
    NotConnected,

    #[error("Publish request rejected by client: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("No PUBACK within {0}s")]
    AckTimeout(u64),

    #[error("Acknowledgement dropped: {0}")]
    AckDropped(String),
}

/// Startup configuration failures, the only errors that end the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No devices configured in [place].device_ids")]
    NoDevices,

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
