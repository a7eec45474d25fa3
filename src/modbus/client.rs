use async_trait::async_trait;
use log::{debug, error, info, warn};
use serialport::{ClearBuffer, SerialPort};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::protocol::{
    build_read_request, parse_read_response, FunctionCode, WordOrder, EXCEPTION_RESPONSE_LEN,
};
use crate::config::settings::{ParityConfig, SerialConfig};
use crate::utils::error::TransportError;

#[async_trait]
pub trait ModbusClientTrait: Send + Sync {
    /// Reads `count` registers and returns the raw data bytes.
    async fn read_registers(
        &self,
        slave_id: u8,
        function: FunctionCode,
        start_addr: u16,
        count: u16,
    ) -> Result<Vec<u8>, TransportError>;

    /// Reads a 32-bit float stored in two consecutive registers.
    async fn read_float(
        &self,
        slave_id: u8,
        function: FunctionCode,
        addr: u16,
        order: WordOrder,
    ) -> Result<f32, TransportError> {
        let data = self.read_registers(slave_id, function, addr, 2).await?;
        let raw: [u8; 4] = data.as_slice().try_into().map_err(|_| {
            TransportError::InvalidResponse(format!("expected 4 data bytes, got {}", data.len()))
        })?;
        Ok(order.decode_f32(raw))
    }
}

/// Modbus RTU master on one serial line.
///
/// The port is opened eagerly but a failure is not fatal: every read retries
/// the open, and a port that fails mid-write is dropped and reopened later.
pub struct ModbusClient {
    config: Arc<SerialConfig>,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
}

impl ModbusClient {
    pub fn new(config: &SerialConfig) -> Self {
        info!("🔌 Connecting to Modbus RTU port: {}", config.port);
        info!(
            "⚙️  Configuration: {} baud, {} data bits, {} stop bit(s), parity {:?}, timeout {} ms",
            config.baud_rate, config.byte_size, config.stop_bits, config.parity, config.timeout_ms
        );

        let port = match open_port(config) {
            Ok(port) => {
                info!("✅ Modbus RTU connection established");
                Some(port)
            }
            Err(e) => {
                warn!("⚠️  {}, will retry on every read", e);
                None
            }
        };

        Self {
            config: Arc::new(config.clone()),
            port: Arc::new(Mutex::new(port)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.lock().map(|p| p.is_some()).unwrap_or(false)
    }
}

fn open_port(config: &SerialConfig) -> Result<Box<dyn SerialPort>, TransportError> {
    let parity = match config.parity {
        ParityConfig::None => serialport::Parity::None,
        ParityConfig::Even => serialport::Parity::Even,
        ParityConfig::Odd => serialport::Parity::Odd,
    };
    let data_bits = match config.byte_size {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    };
    let stop_bits = match config.stop_bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    };

    serialport::new(&config.port, config.baud_rate)
        .timeout(Duration::from_millis(config.timeout_ms))
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .open()
        .map_err(|e| {
            error!("❌ Failed to open serial port {}: {}", config.port, e);
            TransportError::ConnectionError(format!("Failed to open port {}: {}", config.port, e))
        })
}

/// One request/response exchange on an exclusive port.
fn transact(
    port: &mut dyn SerialPort,
    request: &[u8],
) -> Result<Vec<u8>, TransportError> {
    // Drop whatever a previous timed-out exchange left behind.
    port.clear(ClearBuffer::Input)?;

    debug!("→ {}", hex::encode(request));
    port.write_all(request)
        .map_err(|e| TransportError::CommunicationError(format!("Write failed: {}", e)))?;
    port.flush()
        .map_err(|e| TransportError::CommunicationError(format!("Flush failed: {}", e)))?;

    let mut frame = vec![0u8; 3];
    port.read_exact(&mut frame)?;

    let remaining = if frame[1] & 0x80 != 0 {
        EXCEPTION_RESPONSE_LEN - 3
    } else {
        frame[2] as usize + 2
    };
    let mut tail = vec![0u8; remaining];
    port.read_exact(&mut tail)?;
    frame.extend_from_slice(&tail);
    debug!("← {}", hex::encode(&frame));
    Ok(frame)
}

#[async_trait]
impl ModbusClientTrait for ModbusClient {
    async fn read_registers(
        &self,
        slave_id: u8,
        function: FunctionCode,
        start_addr: u16,
        count: u16,
    ) -> Result<Vec<u8>, TransportError> {
        debug!(
            "📊 Reading {} registers from device {} at 0x{:04X} (fc {})",
            count,
            slave_id,
            start_addr,
            function.code()
        );

        let request = build_read_request(slave_id, function, start_addr, count);
        let port = Arc::clone(&self.port);
        let config = Arc::clone(&self.config);

        let frame = tokio::task::spawn_blocking(move || {
            let mut guard = port.lock().map_err(|_| TransportError::LockError)?;
            if guard.is_none() {
                *guard = Some(open_port(&config)?);
                info!("✅ Serial port {} reopened", config.port);
            }
            let Some(open) = guard.as_mut() else {
                return Err(TransportError::ConnectionError("port not open".to_string()));
            };

            let result = transact(&mut **open, &request);
            if matches!(result, Err(TransportError::CommunicationError(_))) {
                // write side is broken; reopen on the next read
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| TransportError::CommunicationError(format!("Serial task failed: {}", e)))??;

        parse_read_response(slave_id, function, count, &frame)
    }
}
