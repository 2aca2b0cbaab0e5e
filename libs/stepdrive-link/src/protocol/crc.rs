//! CRC-16/Modbus (poly 0xA001 reflected, init 0xFFFF, low byte first on the wire)

use errors::{DriveError, DriveResult};

use super::constants::CRC_SIZE;

/// Compute the CRC-16/Modbus checksum of `data`
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the CRC of `buf[..len]` at `buf[len..len + 2]`
///
/// Returns the new frame length.
pub fn append_crc(buf: &mut [u8], len: usize) -> DriveResult<usize> {
    let needed = len + CRC_SIZE;
    if len > buf.len() || needed > buf.len() {
        return Err(DriveError::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }
    let crc = crc16(&buf[..len]);
    buf[len..needed].copy_from_slice(&crc.to_le_bytes());
    Ok(needed)
}

/// Check the trailing CRC of a complete frame
pub fn verify_crc(frame: &[u8]) -> DriveResult<()> {
    if frame.len() < CRC_SIZE + 1 {
        return Err(DriveError::IncompleteRead {
            read: frame.len(),
            expected: CRC_SIZE + 1,
        });
    }
    let split = frame.len() - CRC_SIZE;
    let expected = crc16(&frame[..split]);
    let actual = u16::from_le_bytes([frame[split], frame[split + 1]]);
    if expected != actual {
        return Err(DriveError::CrcMismatch { expected, actual });
    }
    Ok(())
}
