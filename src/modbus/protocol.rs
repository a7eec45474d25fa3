use serde::{Deserialize, Serialize};

use super::crc::crc16_modbus;
use crate::utils::error::TransportError;

/// Register read functions supported by the SPM-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    ReadInputRegisters,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
        }
    }
}

/// Byte layout of a 32-bit value spread over two registers, named by the
/// position of the big-endian bytes `ABCD` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordOrder {
    /// ABCD
    Big,
    /// DCBA
    Little,
    /// BADC
    BigSwap,
    /// CDAB, used by the SPM-1
    LittleSwap,
}

impl WordOrder {
    pub fn decode_f32(self, raw: [u8; 4]) -> f32 {
        let [r0, r1, r2, r3] = raw;
        let abcd = match self {
            WordOrder::Big => [r0, r1, r2, r3],
            WordOrder::Little => [r3, r2, r1, r0],
            WordOrder::BigSwap => [r1, r0, r3, r2],
            WordOrder::LittleSwap => [r2, r3, r0, r1],
        };
        f32::from_be_bytes(abcd)
    }
}

/// Builds a complete RTU read request including CRC.
pub fn build_read_request(slave_id: u8, function: FunctionCode, start_addr: u16, count: u16) -> Vec<u8> {
    let mut request = vec![slave_id, function.code()];
    request.extend_from_slice(&start_addr.to_be_bytes());
    request.extend_from_slice(&count.to_be_bytes());

    let crc = crc16_modbus(&request);
    request.extend_from_slice(&crc.to_le_bytes());
    request
}

/// Length of a normal read response carrying `count` registers.
pub fn read_response_len(count: u16) -> usize {
    5 + count as usize * 2
}

/// Length of an exception response.
pub const EXCEPTION_RESPONSE_LEN: usize = 5;

fn check_crc(frame: &[u8]) -> Result<(), TransportError> {
    let data_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    let expected = crc16_modbus(&frame[..data_len]);
    if received != expected {
        return Err(TransportError::CrcError { expected, received });
    }
    Ok(())
}

/// Validates a read response frame and returns only the register data bytes.
pub fn parse_read_response(
    slave_id: u8,
    function: FunctionCode,
    count: u16,
    frame: &[u8],
) -> Result<Vec<u8>, TransportError> {
    if frame.len() < EXCEPTION_RESPONSE_LEN {
        return Err(TransportError::InvalidResponse(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }

    if frame[1] == function.code() | 0x80 {
        check_crc(&frame[..EXCEPTION_RESPONSE_LEN])?;
        return Err(TransportError::Exception {
            function: function.code(),
            code: frame[2],
        });
    }

    let expected_len = read_response_len(count);
    if frame.len() != expected_len {
        return Err(TransportError::InvalidResponse(format!(
            "expected {} bytes, got {}",
            expected_len,
            frame.len()
        )));
    }

    check_crc(frame)?;

    if frame[0] != slave_id {
        return Err(TransportError::InvalidResponse(format!(
            "reply from slave {} while polling {}",
            frame[0], slave_id
        )));
    }
    if frame[1] != function.code() {
        return Err(TransportError::InvalidResponse(format!(
            "function 0x{:02X} in reply, expected 0x{:02X}",
            frame[1],
            function.code()
        )));
    }
    if frame[2] as usize != count as usize * 2 {
        return Err(TransportError::InvalidResponse(format!(
            "byte count {} for {} registers",
            frame[2], count
        )));
    }

    Ok(frame[3..expected_len - 2].to_vec())
}
