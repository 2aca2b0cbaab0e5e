//! Fixed-capacity frame buffer
//!
//! Frames live on the stack for the duration of one exchange. Every append
//! is bounds-checked against the frame's limit.

use errors::{DriveError, DriveResult};

use super::constants::{EXCEPTION_FLAG, MAX_FRAME_SIZE};
use super::crc::crc16;

/// One request or response on the wire
#[derive(Clone)]
pub struct Frame {
    data: [u8; MAX_FRAME_SIZE],
    len: usize,
    limit: usize,
}

impl Frame {
    /// Empty frame bounded by [`MAX_FRAME_SIZE`]
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_SIZE)
    }

    /// Empty frame bounded by `limit` bytes (capped at [`MAX_FRAME_SIZE`])
    pub fn with_limit(limit: usize) -> Self {
        Self {
            data: [0; MAX_FRAME_SIZE],
            len: 0,
            limit: limit.min(MAX_FRAME_SIZE),
        }
    }

    /// Copy received bytes into a frame
    pub fn from_slice(bytes: &[u8]) -> DriveResult<Self> {
        let mut frame = Self::new();
        frame.extend(bytes)?;
        Ok(frame)
    }

    pub fn push(&mut self, byte: u8) -> DriveResult<()> {
        self.ensure_room(1)?;
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push a big-endian u16
    pub fn push_u16(&mut self, value: u16) -> DriveResult<()> {
        self.extend(&value.to_be_bytes())
    }

    pub fn extend(&mut self, bytes: &[u8]) -> DriveResult<()> {
        self.ensure_room(bytes.len())?;
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Append the CRC trailer, low byte first
    pub fn seal(&mut self) -> DriveResult<()> {
        let crc = crc16(self.as_slice());
        self.extend(&crc.to_le_bytes())
    }

    fn ensure_room(&self, extra: usize) -> DriveResult<()> {
        if self.len + extra > self.limit {
            return Err(DriveError::BufferTooSmall {
                needed: self.len + extra,
                available: self.limit,
            });
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bus address byte
    pub fn address(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// Raw function code byte, exception flag included
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().get(1).copied()
    }

    pub fn is_exception(&self) -> bool {
        self.function_code()
            .is_some_and(|fc| fc & EXCEPTION_FLAG != 0)
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame[{}]", common::hex::encode_spaced(self.as_slice()))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_push_and_seal() {
        let mut frame = Frame::new();
        frame.push(0x01).unwrap();
        frame.push(0x03).unwrap();
        frame.push_u16(0x0000).unwrap();
        frame.push_u16(0x000A).unwrap();
        frame.seal().unwrap();
        assert_eq!(
            frame.as_slice(),
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
        );
        assert_eq!(frame.address(), Some(0x01));
        assert!(!frame.is_exception());
    }

    #[test]
    fn test_limit_enforced() {
        let mut frame = Frame::with_limit(4);
        frame.extend(&[1, 2, 3]).unwrap();
        let err = frame.push_u16(0xFFFF).unwrap_err();
        assert!(matches!(
            err,
            DriveError::BufferTooSmall {
                needed: 5,
                available: 4
            }
        ));
        assert_eq!(frame.len(), 3);

        frame.push(4).unwrap();
        assert!(frame.seal().is_err());
    }

    #[test]
    fn test_exception_detection() {
        let frame = Frame::from_slice(&[0x01, 0x83, 0x02]).unwrap();
        assert!(frame.is_exception());
        assert_eq!(frame.function_code(), Some(0x83));
    }

    #[test]
    fn test_debug_renders_hex() {
        let frame = Frame::from_slice(&[0x01, 0x06]).unwrap();
        assert_eq!(format!("{frame:?}"), "Frame[01 06]");
    }
}
