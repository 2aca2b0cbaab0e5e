//! Stepdrive Link Library
//!
//! Register model, frame codec and transports for stepper drives on an
//! RS-485 Modbus-style bus.
//!
//! # Architecture
//!
//! This library provides:
//! - **Bytes Utilities**: byte order and width-aware integer encoding
//! - **Registers**: typed registers with value domains, and a per-controller
//!   [`RegisterDirectory`]
//! - **Protocol**: CRC-16, frame buffers, request builders and the response
//!   parser ([`FrameCodec`])
//! - **Transports**: the [`Transport`] trait, a serial implementation and an
//!   in-process [`SimulatedBus`]
//!
//! # Features
//!
//! - `test-utils` - exposes `ScriptedTransport` for tests in dependent crates

pub mod bytes;
pub mod directory;
pub mod protocol;
pub mod register;
pub mod transport;

// Re-export core types
pub use bytes::{ByteOrder, Width};
pub use directory::RegisterDirectory;
pub use protocol::codec::BROADCAST_ADDRESS;
pub use protocol::constants::DEFAULT_TEST_VALUE;
pub use protocol::{crc16, ExceptionCode, Frame, FrameCodec, FunctionCode};
pub use register::{Domain, Register};
pub use transport::{
    DeviceBehavior, Fault, Parity, RegisterMemory, SerialSettings, SerialTransport,
    SimulatedBus, StopBits, Transport,
};

#[cfg(any(test, feature = "test-utils"))]
pub use transport::ScriptedTransport;
