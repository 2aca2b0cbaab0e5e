//! Transport boundary
//!
//! The codec hands complete frames to a [`Transport`] and gets raw response
//! bytes back. Line settings (baud, parity, timeout) belong to the transport
//! and are fixed before the first exchange.

pub mod serial;
pub mod simulated;

#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

use errors::{DriveError, DriveResult};

use crate::protocol::constants::{
    CRC_SIZE, ECHO_FRAME_SIZE, EXCEPTION_FLAG, EXCEPTION_FRAME_SIZE,
};
use crate::protocol::FunctionCode;

pub use serial::{Parity, SerialSettings, SerialTransport, StopBits};
pub use simulated::{DeviceBehavior, Fault, RegisterMemory, SimulatedBus};

#[cfg(any(test, feature = "test-utils"))]
pub use scripted::ScriptedTransport;

/// One blocking request/response round trip per call
///
/// Implementations serialize exchanges: a second frame is never written
/// before the previous response (or timeout) has resolved.
pub trait Transport: Send + Sync {
    /// Send `frame`; when `expect_response` is set, block until a complete
    /// response frame arrives or the transport's timeout expires.
    ///
    /// Returns an empty vector when no response is expected.
    fn transmit_and_maybe_receive(&self, frame: &[u8], expect_response: bool)
        -> DriveResult<Vec<u8>>;

    /// Human-readable endpoint name for logs
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

/// Number of response bytes to read before the total length is known
///
/// Read responses carry a byte count in their third byte, so three bytes are
/// needed; every other response is identified by address and function code.
pub fn header_length(request: &[u8]) -> DriveResult<usize> {
    let code = *request.get(1).ok_or(DriveError::SizeMismatch {
        expected: 2,
        actual: request.len(),
    })?;
    Ok(FunctionCode::try_from(code)?.response_header_length())
}

/// Total response length implied by a received header
pub fn frame_length(header: &[u8]) -> DriveResult<usize> {
    if header.len() < 2 {
        return Err(DriveError::IncompleteRead {
            read: header.len(),
            expected: 2,
        });
    }
    let code = header[1];
    if code & EXCEPTION_FLAG != 0 {
        return Ok(EXCEPTION_FRAME_SIZE);
    }
    match FunctionCode::try_from(code)? {
        FunctionCode::ReadHoldingRegisters => {
            let byte_count = *header.get(2).ok_or(DriveError::IncompleteRead {
                read: header.len(),
                expected: 3,
            })?;
            Ok(3 + usize::from(byte_count) + CRC_SIZE)
        },
        _ => Ok(ECHO_FRAME_SIZE),
    }
}

/// Bytes still to read after `header`
pub fn data_length(header: &[u8]) -> DriveResult<usize> {
    let total = frame_length(header)?;
    total
        .checked_sub(header.len())
        .ok_or(DriveError::SizeMismatch {
            expected: total,
            actual: header.len(),
        })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_header_length_by_request() {
        assert_eq!(header_length(&[0x01, 0x03, 0x00, 0x20, 0x00, 0x01]).unwrap(), 3);
        assert_eq!(header_length(&[0x01, 0x06, 0x00, 0x1E, 0x20, 0x01]).unwrap(), 2);
        assert_eq!(header_length(&[0x01, 0x08]).unwrap(), 2);
        assert!(header_length(&[0x01]).is_err());
        assert!(matches!(
            header_length(&[0x01, 0x2B]).unwrap_err(),
            DriveError::UnexpectedFunction(0x2B)
        ));
    }

    #[test]
    fn test_data_length() {
        // read: byte count 4 -> 4 data bytes + CRC
        assert_eq!(data_length(&[0x01, 0x03, 0x04]).unwrap(), 6);
        // write echo
        assert_eq!(data_length(&[0x01, 0x10]).unwrap(), 6);
        // exception after a two-byte header: code + CRC
        assert_eq!(data_length(&[0x01, 0x86]).unwrap(), 3);
        // exception after a three-byte header: CRC only
        assert_eq!(data_length(&[0x01, 0x83, 0x02]).unwrap(), 2);
    }
}
