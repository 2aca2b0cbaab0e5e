//! Request builders and response parser for one bus address
//!
//! Builders validate every outgoing value against its register before a byte
//! is produced, so a rejected request is never transmitted. The parser checks
//! CRC, address, function code and echoed fields before anything reaches the
//! register directory, and commits a response only as a whole.

use common::hex;
use errors::{DriveError, DriveResult};
use tracing::{debug, warn};

use super::constants::{
    ExceptionCode, FunctionCode, DIAGNOSTIC_RETURN_QUERY, ECHO_FRAME_SIZE, EXCEPTION_FLAG,
    EXCEPTION_FRAME_SIZE, MAX_READ_REGISTERS, MAX_WRITE_FRAME_SIZE,
};
use super::crc::verify_crc;
use super::frame::Frame;
use crate::bytes::Width;
use crate::directory::RegisterDirectory;
use crate::register::Register;
use crate::transport::Transport;

/// Address reserved for broadcast writes; devices never answer it
pub const BROADCAST_ADDRESS: u8 = 0;

/// Smallest well-formed request: address, function, 4 payload bytes, CRC
const MIN_REQUEST_SIZE: usize = 8;

/// Frame builder/parser bound to one controller's bus address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    bus_address: u8,
    base_width: Width,
    write_limit: usize,
}

impl FrameCodec {
    /// Codec with 16-bit base registers and the device write-frame limit
    pub fn new(bus_address: u8) -> Self {
        Self {
            bus_address,
            base_width: Width::Word,
            write_limit: MAX_WRITE_FRAME_SIZE,
        }
    }

    pub fn with_base_width(mut self, base_width: Width) -> Self {
        self.base_width = base_width;
        self
    }

    pub fn with_write_limit(mut self, write_limit: usize) -> Self {
        self.write_limit = write_limit;
        self
    }

    pub fn bus_address(&self) -> u8 {
        self.bus_address
    }

    pub fn base_width(&self) -> Width {
        self.base_width
    }

    pub fn is_broadcast(&self) -> bool {
        self.bus_address == BROADCAST_ADDRESS
    }

    // ========================================================================
    // Request builders
    // ========================================================================

    /// Diagnostic "return query data" request echoing `test_value`
    pub fn diagnostic_request(&self, test_value: u16) -> DriveResult<Frame> {
        let mut frame = Frame::with_limit(self.write_limit);
        frame.push(self.bus_address)?;
        frame.push(FunctionCode::Diagnostics.as_u8())?;
        frame.push_u16(DIAGNOSTIC_RETURN_QUERY)?;
        frame.push_u16(test_value)?;
        frame.seal()?;
        Ok(frame)
    }

    /// Single register write; only base-width registers qualify
    pub fn single_write_request(&self, register: &Register, value: i64) -> DriveResult<Frame> {
        if register.width() != self.base_width {
            return Err(DriveError::SizeMismatch {
                expected: self.base_width.bytes(),
                actual: register.byte_size(),
            });
        }

        let mut value_bytes = [0u8; 4];
        let n = register.encode_candidate(value, &mut value_bytes)?;

        let mut frame = Frame::with_limit(self.write_limit);
        frame.push(self.bus_address)?;
        frame.push(FunctionCode::WriteSingleRegister.as_u8())?;
        frame.push_u16(register.address())?;
        frame.extend(&value_bytes[..n])?;
        frame.seal()?;
        Ok(frame)
    }

    /// Consecutive multi-register write starting at `start`
    ///
    /// `values` must cover whole registers exactly: the walk advances by each
    /// register's own width, and a value array that ends inside a combined
    /// register is rejected.
    pub fn multi_write_request(
        &self,
        directory: &RegisterDirectory,
        start: u16,
        values: &[u8],
    ) -> DriveResult<Frame> {
        if values.is_empty() {
            return Err(DriveError::InvalidParameter {
                param: "values".to_string(),
                reason: "multi-register write needs at least one register".to_string(),
            });
        }
        let byte_count = u8::try_from(values.len()).map_err(|_| DriveError::BufferTooSmall {
            needed: values.len(),
            available: usize::from(u8::MAX),
        })?;

        let plan = self.walk_registers(directory, start, values)?;
        for (address, slice) in &plan {
            directory.with_register(*address, |register| register.test_conformance(slice))??;
        }
        let register_count = (values.len() / self.base_width.bytes()) as u16;

        let mut frame = Frame::with_limit(self.write_limit);
        frame.push(self.bus_address)?;
        frame.push(FunctionCode::WriteMultipleRegisters.as_u8())?;
        frame.push_u16(start)?;
        frame.push_u16(register_count)?;
        frame.push(byte_count)?;
        frame.extend(values)?;
        frame.seal()?;
        Ok(frame)
    }

    /// Read `count` base-width registers starting at `start`
    pub fn read_request(&self, start: u16, count: u16) -> DriveResult<Frame> {
        if count == 0 || count > MAX_READ_REGISTERS {
            return Err(DriveError::InvalidParameter {
                param: "count".to_string(),
                reason: format!("must be within 1..={MAX_READ_REGISTERS}, got {count}"),
            });
        }

        let mut frame = Frame::new();
        frame.push(self.bus_address)?;
        frame.push(FunctionCode::ReadHoldingRegisters.as_u8())?;
        frame.push_u16(start)?;
        frame.push_u16(count)?;
        frame.seal()?;
        Ok(frame)
    }

    // ========================================================================
    // Response handling
    // ========================================================================

    /// Whether a response header comes from this controller
    ///
    /// Only 2- and 3-byte headers are meaningful; anything else fails closed.
    pub fn same_address(&self, header: &[u8]) -> bool {
        matches!(header.len(), 2 | 3) && header[0] == self.bus_address
    }

    /// Validate `response` against `request` and commit its register data
    pub fn parse_response(
        &self,
        request: &[u8],
        response: &[u8],
        directory: &RegisterDirectory,
    ) -> DriveResult<()> {
        if request.len() < MIN_REQUEST_SIZE {
            return Err(DriveError::SizeMismatch {
                expected: MIN_REQUEST_SIZE,
                actual: request.len(),
            });
        }
        if response.len() < EXCEPTION_FRAME_SIZE {
            return Err(DriveError::IncompleteRead {
                read: response.len(),
                expected: EXCEPTION_FRAME_SIZE,
            });
        }

        verify_crc(response)?;

        let function = response[1];
        let header_len = if function & EXCEPTION_FLAG != 0
            || function == FunctionCode::ReadHoldingRegisters.as_u8()
        {
            3
        } else {
            2
        };
        if !self.same_address(&response[..header_len]) {
            return Err(DriveError::AddressMismatch {
                expected: self.bus_address,
                actual: response[0],
            });
        }

        let requested = request[1];
        if function & EXCEPTION_FLAG != 0 {
            Self::expect_length(response, EXCEPTION_FRAME_SIZE)?;
            if function & !EXCEPTION_FLAG != requested {
                return Err(DriveError::UnexpectedFunction(function));
            }
            let code = ExceptionCode::from_u8(response[2]);
            warn!(
                "Device {} exception for FC {:02X}: {} ({})",
                self.bus_address,
                requested,
                code.as_u8(),
                code.description()
            );
            return Err(DriveError::DeviceException {
                function: requested,
                code: code.as_u8(),
            });
        }
        if function != requested {
            return Err(DriveError::UnexpectedFunction(function));
        }

        match FunctionCode::try_from(function)? {
            FunctionCode::Diagnostics => {
                Self::expect_length(response, ECHO_FRAME_SIZE)?;
                self.check_diagnostic_echo(request, response)
            },
            FunctionCode::WriteSingleRegister => {
                Self::expect_length(response, ECHO_FRAME_SIZE)?;
                Self::check_echo(request, response, function)?;
                let address = u16::from_be_bytes([response[2], response[3]]);
                directory.commit(&[(address, &request[4..6])])
            },
            FunctionCode::WriteMultipleRegisters => {
                Self::expect_length(response, ECHO_FRAME_SIZE)?;
                Self::check_echo(request, response, function)?;
                let start = u16::from_be_bytes([response[2], response[3]]);
                // The device echoes addressing only; values come from the request
                let byte_count = usize::from(request[6]);
                let values = request.get(7..7 + byte_count).ok_or(DriveError::SizeMismatch {
                    expected: 7 + byte_count,
                    actual: request.len(),
                })?;
                let plan = self.walk_registers(directory, start, values)?;
                directory.commit(&plan)
            },
            FunctionCode::ReadHoldingRegisters => self.apply_read(request, response, directory),
        }
    }

    /// Send `request`, wait for the reply and apply it
    ///
    /// Broadcast requests are sent without waiting for a reply.
    pub fn exchange(
        &self,
        transport: &dyn Transport,
        request: &Frame,
        directory: &RegisterDirectory,
    ) -> DriveResult<()> {
        let expect_response = !self.is_broadcast();
        debug!(
            "TX [{}] -> {}: {}",
            self.bus_address,
            transport.describe(),
            hex::encode_spaced(request.as_slice())
        );
        let response = transport.transmit_and_maybe_receive(request.as_slice(), expect_response)?;
        if !expect_response {
            return Ok(());
        }
        debug!(
            "RX [{}]: {}",
            self.bus_address,
            hex::encode_spaced(&response)
        );
        self.parse_response(request.as_slice(), &response, directory)
    }

    fn apply_read(
        &self,
        request: &[u8],
        response: &[u8],
        directory: &RegisterDirectory,
    ) -> DriveResult<()> {
        let byte_count = usize::from(response[2]);
        let payload_len = response.len() - EXCEPTION_FRAME_SIZE;
        if byte_count != payload_len {
            return Err(DriveError::BadByteCount {
                expected: payload_len,
                actual: byte_count,
            });
        }

        let requested = usize::from(u16::from_be_bytes([request[4], request[5]]));
        let expected = requested * self.base_width.bytes();
        if byte_count != expected {
            return Err(DriveError::BadByteCount {
                expected,
                actual: byte_count,
            });
        }

        let start = u16::from_be_bytes([request[2], request[3]]);
        let data = &response[3..3 + byte_count];
        let plan = self.walk_registers(directory, start, data)?;
        directory.commit(&plan)
    }

    /// Split `data` into per-register slices starting at `start`
    ///
    /// Each register consumes `base_width * multiplier` bytes. Fails on
    /// missing registers and widths that are not a multiple of the base
    /// width. A combined register cut off at either end of `data` is a
    /// partial register.
    fn walk_registers<'a>(
        &self,
        directory: &RegisterDirectory,
        start: u16,
        data: &'a [u8],
    ) -> DriveResult<Vec<(u16, &'a [u8])>> {
        let base = self.base_width;
        let mut plan = Vec::new();
        let mut offset = 0;
        let mut address = start;

        while offset < data.len() {
            let (width, slots) = directory
                .with_register(address, |register| {
                    register
                        .slots(base)
                        .map(|slots| (register.byte_size(), slots))
                })
                .map_err(|e| match directory.covering(address, base) {
                    Some(owner) => DriveError::PartialRegister { address: owner },
                    None => e,
                })??;

            if offset + width > data.len() {
                return Err(DriveError::PartialRegister { address });
            }
            plan.push((address, &data[offset..offset + width]));
            offset += width;

            if offset < data.len() {
                address = address
                    .checked_add(slots as u16)
                    .ok_or(DriveError::UnknownRegister(u16::MAX))?;
            }
        }
        Ok(plan)
    }

    fn expect_length(response: &[u8], expected: usize) -> DriveResult<()> {
        if response.len() != expected {
            return Err(DriveError::SizeMismatch {
                expected,
                actual: response.len(),
            });
        }
        Ok(())
    }

    fn check_echo(request: &[u8], response: &[u8], function: u8) -> DriveResult<()> {
        if request[2..6] != response[2..6] {
            return Err(DriveError::EchoMismatch { function });
        }
        Ok(())
    }

    /// Sub-function must echo; data may echo or come back as zero
    fn check_diagnostic_echo(&self, request: &[u8], response: &[u8]) -> DriveResult<()> {
        let function = FunctionCode::Diagnostics.as_u8();
        if request[2..4] != response[2..4] {
            return Err(DriveError::EchoMismatch { function });
        }
        let data = &response[4..6];
        if data == [0, 0] || data == &request[4..6] {
            Ok(())
        } else {
            Err(DriveError::EchoMismatch { function })
        }
    }
}
