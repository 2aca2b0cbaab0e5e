//! Byte order of multi-byte register values on the wire

use serde::{Deserialize, Serialize};

/// Byte order used when composing a register value from wire bytes
///
/// For the 32-bit value `0x12345678`:
/// - `BigEndian`: [0x12, 0x34, 0x56, 0x78]
/// - `LittleEndian`: [0x78, 0x56, 0x34, 0x12]
///
/// One order is fixed per controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Most significant byte first
    BigEndian,
    /// Least significant byte first
    LittleEndian,
}

impl ByteOrder {
    /// Check if this is big-endian
    pub fn is_big_endian(&self) -> bool {
        matches!(self, Self::BigEndian)
    }
}

impl Default for ByteOrder {
    /// Modbus register data is big-endian
    fn default() -> Self {
        Self::BigEndian
    }
}
