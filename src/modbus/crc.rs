/// CRC-16/MODBUS (poly 0xA001 reflected, init 0xFFFF). Transmitted low byte first.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    let poly: u16 = 0xA001;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ poly;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_modbus_known_frame() {
        // 01 03 00 00 00 0A -> C5 CD on the wire
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A];
        assert_eq!(crc16_modbus(&data), 0xCDC5);
        assert_eq!(crc16_modbus(&data).to_le_bytes(), [0xC5, 0xCD]);
    }

    #[test]
    fn test_crc16_modbus_frame_with_crc_checks_to_zero() {
        let mut frame = vec![0x11, 0x04, 0x10, 0x00, 0x00, 0x02];
        let crc = crc16_modbus(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(crc16_modbus(&frame), 0);
    }
}
