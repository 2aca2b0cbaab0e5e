//! Unified error handling for the stepdrive workspace
//!
//! Every layer of the drive stack (byte codec, registers, frame codec,
//! transports, controllers and the busy monitor) reports failures through
//! [`DriveError`]. Each failure kind has its own variant so callers can tell
//! a CRC mismatch from an echo mismatch from a device exception without
//! parsing messages.

use thiserror::Error;

// ============================================================================
// DriveError - Main error type
// ============================================================================

/// Main error type for all stepdrive crates
#[derive(Debug, Error)]
pub enum DriveError {
    // ======================================
    // Local Encode/Decode Errors
    // ======================================
    #[error("Buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    // ======================================
    // Validation Errors
    // ======================================
    #[error("Value {value} is outside the domain of register 0x{address:04X}")]
    OutOfRange { address: u16, value: i64 },

    #[error("Invalid parameter: {param}: {reason}")]
    InvalidParameter { param: String, reason: String },

    // ======================================
    // Register Layout Errors
    // ======================================
    #[error("Register 0x{address:04X} width {width} is not a multiple of the base width")]
    MisalignedRegister { address: u16, width: usize },

    #[error("Partial access to combined register 0x{address:04X}")]
    PartialRegister { address: u16 },

    #[error("No register at address 0x{0:04X}")]
    UnknownRegister(u16),

    #[error("Register address 0x{0:04X} is already registered")]
    DuplicateRegister(u16),

    // ======================================
    // Protocol Integrity Errors
    // ======================================
    #[error("CRC mismatch: computed 0x{expected:04X}, frame carries 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Address mismatch: expected bus address {expected}, got {actual}")]
    AddressMismatch { expected: u8, actual: u8 },

    #[error("Echoed fields do not match the request (function 0x{function:02X})")]
    EchoMismatch { function: u8 },

    #[error("Malformed byte count: expected {expected}, got {actual}")]
    BadByteCount { expected: usize, actual: usize },

    #[error("Unexpected function code 0x{0:02X}")]
    UnexpectedFunction(u8),

    #[error("Device exception for function 0x{function:02X}: code {code}")]
    DeviceException { function: u8, code: u8 },

    // ======================================
    // Transport Errors
    // ======================================
    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Incomplete write: {written} of {expected} bytes sent")]
    IncompleteWrite { written: usize, expected: usize },

    #[error("Incomplete read: {read} of {expected} bytes received")]
    IncompleteRead { read: usize, expected: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ======================================
    // Controller & Scheduler Usage Errors
    // ======================================
    #[error("Controller not configured: {0}")]
    Unconfigured(String),

    #[error("Controller already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Controller already monitored: {0}")]
    AlreadyMonitored(String),

    #[error("Controller not monitored: {0}")]
    NotMonitored(String),

    #[error("Unknown controller type: {0}")]
    UnknownControllerType(String),

    #[error("Controller type already registered: {0}")]
    DuplicateControllerType(String),

    #[error("Invalid base angle: {0}")]
    InvalidBaseAngle(f64),

    #[error("Partition index {raw} has no option for base angle {angle}")]
    UnmatchedPartition { angle: f64, raw: i64 },

    #[error("Unknown reset dependency: {0}")]
    UnknownResetDependency(String),

    #[error("Reset dependency already registered: {0}")]
    DuplicateResetDependency(String),

    // ======================================
    // Configuration & System Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using DriveError
pub type DriveResult<T> = Result<T, DriveError>;

impl DriveError {
    /// True for failures detected after bytes reached the wire and came back
    /// wrong (CRC, address, echo, byte count, device exception).
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Protocol | ErrorCategory::DataCorruption | ErrorCategory::Device
        )
    }

    /// True when the request never left the process.
    pub fn is_local(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Encoding
                | ErrorCategory::Validation
                | ErrorCategory::Layout
                | ErrorCategory::Usage
                | ErrorCategory::NotFound
                | ErrorCategory::Conflict
        )
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::DriveError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::DriveError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($param:expr, $reason:expr) => {
        $crate::DriveError::InvalidParameter {
            param: $param.to_string(),
            reason: $reason.to_string(),
        }
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::DriveError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::DriveError::Transport(format!($fmt, $($arg)*))
    };
}

// ============================================================================
// DriveError implements DriveErrorTrait
// ============================================================================

impl DriveErrorTrait for DriveError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::BufferTooSmall { .. } => "BUFFER_TOO_SMALL",
            Self::SizeMismatch { .. } => "SIZE_MISMATCH",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::MisalignedRegister { .. } => "MISALIGNED_REGISTER",
            Self::PartialRegister { .. } => "PARTIAL_REGISTER",
            Self::UnknownRegister(_) => "UNKNOWN_REGISTER",
            Self::DuplicateRegister(_) => "DUPLICATE_REGISTER",
            Self::CrcMismatch { .. } => "CRC_MISMATCH",
            Self::AddressMismatch { .. } => "ADDRESS_MISMATCH",
            Self::EchoMismatch { .. } => "ECHO_MISMATCH",
            Self::BadByteCount { .. } => "BAD_BYTE_COUNT",
            Self::UnexpectedFunction(_) => "UNEXPECTED_FUNCTION",
            Self::DeviceException { .. } => "DEVICE_EXCEPTION",
            Self::Timeout(_) => "TIMEOUT",
            Self::IncompleteWrite { .. } => "INCOMPLETE_WRITE",
            Self::IncompleteRead { .. } => "INCOMPLETE_READ",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Unconfigured(_) => "UNCONFIGURED",
            Self::AlreadyInitialized(_) => "ALREADY_INITIALIZED",
            Self::AlreadyMonitored(_) => "ALREADY_MONITORED",
            Self::NotMonitored(_) => "NOT_MONITORED",
            Self::UnknownControllerType(_) => "UNKNOWN_CONTROLLER_TYPE",
            Self::DuplicateControllerType(_) => "DUPLICATE_CONTROLLER_TYPE",
            Self::InvalidBaseAngle(_) => "INVALID_BASE_ANGLE",
            Self::UnmatchedPartition { .. } => "UNMATCHED_PARTITION",
            Self::UnknownResetDependency(_) => "UNKNOWN_RESET_DEPENDENCY",
            Self::DuplicateResetDependency(_) => "DUPLICATE_RESET_DEPENDENCY",
            Self::Configuration(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "UNKNOWN_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::BufferTooSmall { .. } | Self::SizeMismatch { .. } => ErrorCategory::Encoding,

            Self::OutOfRange { .. } | Self::InvalidParameter { .. } => ErrorCategory::Validation,

            Self::MisalignedRegister { .. } | Self::PartialRegister { .. } => {
                ErrorCategory::Layout
            },

            Self::UnknownRegister(_)
            | Self::NotMonitored(_)
            | Self::UnknownControllerType(_)
            | Self::UnknownResetDependency(_) => ErrorCategory::NotFound,

            Self::DuplicateRegister(_)
            | Self::AlreadyMonitored(_)
            | Self::DuplicateControllerType(_)
            | Self::DuplicateResetDependency(_) => ErrorCategory::Conflict,

            Self::CrcMismatch { .. } | Self::EchoMismatch { .. } => ErrorCategory::DataCorruption,

            Self::AddressMismatch { .. }
            | Self::BadByteCount { .. }
            | Self::UnexpectedFunction(_)
            | Self::UnmatchedPartition { .. } => ErrorCategory::Protocol,

            Self::DeviceException { .. } => ErrorCategory::Device,

            Self::Timeout(_) => ErrorCategory::Timeout,

            Self::IncompleteWrite { .. }
            | Self::IncompleteRead { .. }
            | Self::Transport(_)
            | Self::Io(_) => ErrorCategory::Transport,

            Self::Unconfigured(_) | Self::AlreadyInitialized(_) | Self::InvalidBaseAngle(_) => {
                ErrorCategory::Usage
            },

            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Internal(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Drive Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification and log routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Local, before any I/O
    Encoding,
    Validation,
    Layout,

    // Link layer
    Transport,
    Timeout,

    // Frame integrity
    Protocol,
    DataCorruption,
    Device,

    // Caller/integration mistakes
    Usage,
    NotFound,
    Conflict,

    // System level
    Configuration,
    Internal,
    Unknown,
}

/// Shared capability trait for drive errors
///
/// Lets the CLI and service layers classify failures (retry, log level,
/// alerting) without matching on every variant.
pub trait DriveErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable error code for logs and CLI output
    fn error_code(&self) -> &'static str;

    /// Error category
    fn category(&self) -> ErrorCategory;

    /// Whether retrying the same request can succeed.
    ///
    /// The core never retries by itself; this only informs callers.
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Timeout | ErrorCategory::DataCorruption
        )
    }

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> u64 {
        match self.category() {
            ErrorCategory::Timeout => 500,
            ErrorCategory::Transport => 1000,
            ErrorCategory::DataCorruption => 50,
            _ => 0,
        }
    }

    /// Maximum retry attempts
    fn max_retries(&self) -> u32 {
        if self.is_retryable() {
            3
        } else {
            0
        }
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::DataCorruption | ErrorCategory::Usage => {
                Level::ERROR
            },
            ErrorCategory::Transport
            | ErrorCategory::Timeout
            | ErrorCategory::Protocol
            | ErrorCategory::Device => Level::WARN,
            ErrorCategory::Validation | ErrorCategory::NotFound => Level::INFO,
            _ => Level::WARN,
        }
    }

    /// Whether an alert should be triggered
    fn should_alert(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Internal | ErrorCategory::DataCorruption
        )
    }
}
