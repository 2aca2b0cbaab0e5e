//! Binary codec between register values and wire bytes
//!
//! Pure functions only: no I/O, no shared state.

pub mod byte_order;
pub mod conversions;

pub use byte_order::ByteOrder;
pub use conversions::*;
