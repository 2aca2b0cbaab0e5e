//! Range-checked register
//!
//! A [`Register`] is a named, addressed, fixed-width storage cell mirroring one
//! field of device state. Every write goes through the register's [`Domain`]
//! predicate; a rejected write leaves the stored value untouched.

use errors::{DriveError, DriveResult};

use crate::bytes::{self, ByteOrder, Width};

/// Accepted values of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Plain integer in the closed interval `[min, max]`
    Range { min: i64, max: i64 },
    /// Enumerated value in the contiguous interval `[min_bound, max_bound]`
    Linear { min_bound: i64, max_bound: i64 },
    /// Flag set: valid iff every set bit is part of `mask`
    Bitmask { mask: u32 },
}

impl Domain {
    pub const fn range(min: i64, max: i64) -> Self {
        Self::Range { min, max }
    }

    pub const fn linear(min_bound: i64, max_bound: i64) -> Self {
        Self::Linear {
            min_bound,
            max_bound,
        }
    }

    pub const fn bitmask(mask: u32) -> Self {
        Self::Bitmask { mask }
    }

    /// Bitmask domain built from the union of the declared flags
    pub fn flags(flags: &[u32]) -> Self {
        Self::Bitmask {
            mask: flags.iter().fold(0, |acc, f| acc | f),
        }
    }

    pub fn is_valid(&self, candidate: i64) -> bool {
        match *self {
            Self::Range { min, max } => (min..=max).contains(&candidate),
            Self::Linear {
                min_bound,
                max_bound,
            } => (min_bound..=max_bound).contains(&candidate),
            Self::Bitmask { mask } => {
                let mask = i64::from(mask);
                candidate >= 0 && (candidate | mask) == mask
            },
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Range { min, max } => write!(f, "[{min}, {max}]"),
            Self::Linear {
                min_bound,
                max_bound,
            } => write!(f, "enum {min_bound}..={max_bound}"),
            Self::Bitmask { mask } => write!(f, "flags 0x{mask:X}"),
        }
    }
}

/// Named, addressed, typed register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    name: &'static str,
    address: u16,
    width: Width,
    order: ByteOrder,
    signed: bool,
    domain: Domain,
    value: i64,
}

impl Register {
    /// Unsigned, big-endian register
    ///
    /// The default is stored as given: device power-on defaults do not always
    /// sit inside the range the device accepts for writes.
    pub fn new(name: &'static str, address: u16, width: Width, domain: Domain, default: i64) -> Self {
        Self {
            name,
            address,
            width,
            order: ByteOrder::BigEndian,
            signed: false,
            domain,
            value: default,
        }
    }

    /// 16-bit register
    pub fn word(name: &'static str, address: u16, domain: Domain, default: i64) -> Self {
        Self::new(name, address, Width::Word, domain, default)
    }

    /// 32-bit register spanning two consecutive 16-bit addresses
    pub fn double_word(name: &'static str, address: u16, domain: Domain, default: i64) -> Self {
        Self::new(name, address, Width::DoubleWord, domain, default)
    }

    /// Interpret wire values as two's complement
    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn width(&self) -> Width {
        self.width
    }

    pub fn byte_size(&self) -> usize {
        self.width.bytes()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn is_big_endian(&self) -> bool {
        self.order.is_big_endian()
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Currently stored value
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Whether `candidate` lies in this register's domain
    pub fn accepts(&self, candidate: i64) -> bool {
        self.domain.is_valid(candidate)
    }

    /// Number of base-width address slots this register occupies
    pub fn slots(&self, base: Width) -> DriveResult<usize> {
        let (width, base) = (self.byte_size(), base.bytes());
        if width % base != 0 {
            return Err(DriveError::MisalignedRegister {
                address: self.address,
                width,
            });
        }
        Ok(width / base)
    }

    /// Decode and range-check wire bytes without storing them
    pub fn decode(&self, buf: &[u8]) -> DriveResult<i64> {
        let raw = bytes::decode(buf, self.width, self.order)?;
        let value = bytes::from_raw(raw, self.width, self.signed);
        if !self.accepts(value) {
            return Err(DriveError::OutOfRange {
                address: self.address,
                value,
            });
        }
        Ok(value)
    }

    /// Same checks as [`Register::write`] without mutating
    pub fn test_conformance(&self, buf: &[u8]) -> DriveResult<()> {
        self.decode(buf).map(|_| ())
    }

    /// Store wire bytes; rejected values leave the register unchanged
    pub fn write(&mut self, buf: &[u8]) -> DriveResult<()> {
        self.value = self.decode(buf)?;
        Ok(())
    }

    /// Encode the stored value into `out`
    pub fn read(&self, out: &mut [u8]) -> DriveResult<usize> {
        bytes::encode(bytes::to_raw(self.value, self.width), self.width, self.order, out)
    }

    /// Encode a candidate value for transmission, rejecting out-of-domain values
    pub fn encode_candidate(&self, candidate: i64, out: &mut [u8]) -> DriveResult<usize> {
        if !self.accepts(candidate) {
            return Err(DriveError::OutOfRange {
                address: self.address,
                value: candidate,
            });
        }
        bytes::encode(bytes::to_raw(candidate, self.width), self.width, self.order, out)
    }

    /// Store a logical value directly
    pub fn set_value(&mut self, candidate: i64) -> DriveResult<()> {
        if !self.accepts(candidate) {
            return Err(DriveError::OutOfRange {
                address: self.address,
                value: candidate,
            });
        }
        self.value = candidate;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_range_enforcement() {
        let mut reg = Register::word("operating_current", 0x021E, Domain::range(5, 100), 50);

        for rejected in [4u16, 101] {
            let err = reg.write(&rejected.to_be_bytes()).unwrap_err();
            assert!(matches!(err, DriveError::OutOfRange { address: 0x021E, .. }));
            assert_eq!(reg.value(), 50);
        }

        for accepted in [5u16, 100] {
            reg.write(&accepted.to_be_bytes()).unwrap();
            let mut out = [0u8; 2];
            assert_eq!(reg.read(&mut out).unwrap(), 2);
            assert_eq!(u16::from_be_bytes(out), accepted);
        }
    }

    #[test]
    fn test_bitmask_domain() {
        let mut reg = Register::word("flags", 0x0010, Domain::flags(&[0x01, 0x02, 0x04]), 0);
        reg.write(&[0x00, 0x03]).unwrap();
        assert_eq!(reg.value(), 0x03);

        let err = reg.write(&[0x00, 0x08]).unwrap_err();
        assert!(matches!(err, DriveError::OutOfRange { value: 8, .. }));
        assert_eq!(reg.value(), 0x03);
    }

    #[test]
    fn test_linear_domain() {
        let domain = Domain::linear(5, 16);
        assert!(!domain.is_valid(4));
        assert!(domain.is_valid(5));
        assert!(domain.is_valid(16));
        assert!(!domain.is_valid(17));
    }

    #[test]
    fn test_write_size_mismatch() {
        let mut reg = Register::double_word("position", 0x001C, Domain::range(0, 10), 0);
        let err = reg.write(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(
            err,
            DriveError::SizeMismatch {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_signed_double_word() {
        let mut reg = Register::double_word(
            "position",
            0x001C,
            Domain::range(-8_388_608, 8_388_607),
            0,
        )
        .signed();

        let mut out = [0u8; 4];
        reg.encode_candidate(-2, &mut out).unwrap();
        assert_eq!(out, [0xFF, 0xFF, 0xFF, 0xFE]);

        reg.write(&out).unwrap();
        assert_eq!(reg.value(), -2);

        let err = reg.encode_candidate(8_388_608, &mut out).unwrap_err();
        assert!(matches!(err, DriveError::OutOfRange { .. }));
    }

    #[test]
    fn test_conformance_does_not_mutate() {
        let reg = Register::word("current", 0x021E, Domain::range(5, 100), 50);
        reg.test_conformance(&[0x00, 0x10]).unwrap();
        assert!(reg.test_conformance(&[0x00, 0x01]).is_err());
        assert_eq!(reg.value(), 50);
    }

    #[test]
    fn test_little_endian_register() {
        let mut reg = Register::word("le", 0x0001, Domain::range(0, 0xFFFF), 0)
            .with_byte_order(ByteOrder::LittleEndian);
        reg.write(&[0x34, 0x12]).unwrap();
        assert_eq!(reg.value(), 0x1234);
        assert!(!reg.is_big_endian());
    }

    #[test]
    fn test_slots() {
        let reg = Register::double_word("speed", 0x001A, Domain::range(1, 500_000), 1);
        assert_eq!(reg.slots(Width::Word).unwrap(), 2);

        let odd = Register::new("byte", 0x0002, Width::Byte, Domain::range(0, 255), 0);
        assert!(matches!(
            odd.slots(Width::Word).unwrap_err(),
            DriveError::MisalignedRegister { address: 0x0002, width: 1 }
        ));
    }
}
