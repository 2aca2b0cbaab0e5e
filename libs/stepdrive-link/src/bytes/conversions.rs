//! Fixed-width value <-> byte conversions
//!
//! `encode` serializes a raw value into a caller buffer and fails when the
//! buffer is smaller than the width; `decode` requires exactly `width` bytes.

use errors::{DriveError, DriveResult};

use super::ByteOrder;

/// Byte width of a register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    Byte,
    Word,
    DoubleWord,
}

impl Width {
    /// Number of bytes on the wire
    pub const fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::DoubleWord => 4,
        }
    }

    pub fn from_bytes(n: usize) -> Option<Self> {
        match n {
            1 => Some(Self::Byte),
            2 => Some(Self::Word),
            4 => Some(Self::DoubleWord),
            _ => None,
        }
    }

    /// Mask covering every bit of this width
    pub const fn mask(self) -> u32 {
        match self {
            Self::Byte => 0xFF,
            Self::Word => 0xFFFF,
            Self::DoubleWord => 0xFFFF_FFFF,
        }
    }
}

/// Serialize the low `width` bytes of `raw` into `out`
///
/// Returns the number of bytes written.
pub fn encode(raw: u32, width: Width, order: ByteOrder, out: &mut [u8]) -> DriveResult<usize> {
    let n = width.bytes();
    if out.len() < n {
        return Err(DriveError::BufferTooSmall {
            needed: n,
            available: out.len(),
        });
    }

    let be = raw.to_be_bytes();
    let significant = &be[4 - n..];
    match order {
        ByteOrder::BigEndian => out[..n].copy_from_slice(significant),
        ByteOrder::LittleEndian => {
            for (dst, src) in out[..n].iter_mut().zip(significant.iter().rev()) {
                *dst = *src;
            }
        },
    }
    Ok(n)
}

/// Parse exactly `width` bytes into a raw value
pub fn decode(bytes: &[u8], width: Width, order: ByteOrder) -> DriveResult<u32> {
    let n = width.bytes();
    if bytes.len() != n {
        return Err(DriveError::SizeMismatch {
            expected: n,
            actual: bytes.len(),
        });
    }

    let raw = match order {
        ByteOrder::BigEndian => bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b)),
        ByteOrder::LittleEndian => bytes
            .iter()
            .rev()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)),
    };
    Ok(raw)
}

/// Two's complement truncation of a logical value to `width`
pub fn to_raw(value: i64, width: Width) -> u32 {
    (value as u32) & width.mask()
}

/// Interpret a raw value as signed or unsigned of `width`
pub fn from_raw(raw: u32, width: Width, signed: bool) -> i64 {
    let raw = raw & width.mask();
    if !signed {
        return i64::from(raw);
    }
    match width {
        Width::Byte => i64::from(raw as u8 as i8),
        Width::Word => i64::from(raw as u16 as i16),
        Width::DoubleWord => i64::from(raw as i32),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const WIDTHS: [Width; 3] = [Width::Byte, Width::Word, Width::DoubleWord];
    const ORDERS: [ByteOrder; 2] = [ByteOrder::BigEndian, ByteOrder::LittleEndian];

    #[test]
    fn test_encode_layout() {
        let mut buf = [0u8; 4];
        encode(0x1234_5678, Width::DoubleWord, ByteOrder::BigEndian, &mut buf).unwrap();
        assert_eq!(buf, [0x12, 0x34, 0x56, 0x78]);

        encode(0x1234_5678, Width::DoubleWord, ByteOrder::LittleEndian, &mut buf).unwrap();
        assert_eq!(buf, [0x78, 0x56, 0x34, 0x12]);

        let mut buf = [0u8; 2];
        assert_eq!(
            encode(0xABCD, Width::Word, ByteOrder::BigEndian, &mut buf).unwrap(),
            2
        );
        assert_eq!(buf, [0xAB, 0xCD]);
    }

    #[test]
    fn test_encode_truncates_to_width() {
        let mut buf = [0u8; 1];
        encode(0x1FF, Width::Byte, ByteOrder::BigEndian, &mut buf).unwrap();
        assert_eq!(buf, [0xFF]);
    }

    #[test]
    fn test_encode_buffer_too_small() {
        let mut buf = [0u8; 3];
        let err = encode(1, Width::DoubleWord, ByteOrder::BigEndian, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            DriveError::BufferTooSmall {
                needed: 4,
                available: 3
            }
        ));
        assert_eq!(buf, [0, 0, 0]);
    }

    #[test]
    fn test_decode_size_mismatch() {
        let err = decode(&[0x00, 0x01, 0x02], Width::Word, ByteOrder::BigEndian).unwrap_err();
        assert!(matches!(
            err,
            DriveError::SizeMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_round_trip_all_widths_and_orders() {
        let samples: [u32; 6] = [0, 1, 0x7F, 0x80, 0xBEEF, 0xDEAD_BEEF];
        for width in WIDTHS {
            for order in ORDERS {
                for sample in samples {
                    let raw = sample & width.mask();
                    let mut buf = [0u8; 4];
                    let n = encode(raw, width, order, &mut buf).unwrap();
                    assert_eq!(n, width.bytes());
                    assert_eq!(decode(&buf[..n], width, order).unwrap(), raw, "{width:?} {order:?}");
                }
            }
        }
    }

    #[test]
    fn test_signed_interpretation() {
        assert_eq!(from_raw(0xFF, Width::Byte, true), -1);
        assert_eq!(from_raw(0xFF, Width::Byte, false), 255);
        assert_eq!(from_raw(0x8000, Width::Word, true), -32768);
        assert_eq!(from_raw(0xFF80_0000, Width::DoubleWord, true), -8_388_608);
        assert_eq!(to_raw(-8_388_608, Width::DoubleWord), 0xFF80_0000);
        assert_eq!(to_raw(-1, Width::Word), 0xFFFF);
    }

    #[test]
    fn test_width_from_bytes() {
        assert_eq!(Width::from_bytes(4), Some(Width::DoubleWord));
        assert_eq!(Width::from_bytes(3), None);
    }
}
