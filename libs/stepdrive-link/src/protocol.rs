//! Modbus-style frame codec
//!
//! Builds diagnostic, single-write, multi-write and read requests for one
//! controller and parses the matching responses back into its register
//! directory.

pub mod codec;
pub mod constants;
pub mod crc;
pub mod frame;

pub use codec::FrameCodec;
pub use constants::{ExceptionCode, FunctionCode};
pub use crc::{append_crc, crc16, verify_crc};
pub use frame::Frame;
