//! Wire constants: function codes, exception codes, frame limits

use errors::DriveError;

/// Bit set in the response function code when the device reports an exception
pub const EXCEPTION_FLAG: u8 = 0x80;

/// CRC trailer size in bytes
pub const CRC_SIZE: usize = 2;

/// Largest frame the codec will build or accept
pub const MAX_FRAME_SIZE: usize = 256;

/// Device receive buffer limit for write requests
pub const MAX_WRITE_FRAME_SIZE: usize = 29;

/// Largest register count a single read may request (byte count fits in u8)
pub const MAX_READ_REGISTERS: u16 = 125;

/// Diagnostic sub-function "return query data"
pub const DIAGNOSTIC_RETURN_QUERY: u16 = 0x0000;

/// Payload sent by a default connection test
pub const DEFAULT_TEST_VALUE: u16 = 0x1234;

/// Length of every diagnostic / write response frame
pub const ECHO_FRAME_SIZE: usize = 8;

/// Length of an exception response frame
pub const EXCEPTION_FRAME_SIZE: usize = 5;

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    WriteSingleRegister = 0x06,
    Diagnostics = 0x08,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(Self::ReadHoldingRegisters),
            0x06 => Some(Self::WriteSingleRegister),
            0x08 => Some(Self::Diagnostics),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Response header length: reads carry a byte count after the function code
    pub const fn response_header_length(self) -> usize {
        match self {
            Self::ReadHoldingRegisters => 3,
            _ => 2,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::WriteSingleRegister => "Write Single Register",
            Self::Diagnostics => "Diagnostics",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = DriveError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_u8(code).ok_or(DriveError::UnexpectedFunction(code))
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X} ({})", self.as_u8(), self.description())
    }
}

/// Exception codes reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Other(u8),
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveDeviceFailure,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::SlaveDeviceFailure => 0x04,
            Self::Other(code) => code,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::SlaveDeviceFailure => "Slave device failure",
            Self::Other(_) => "Unknown exception",
        }
    }
}
