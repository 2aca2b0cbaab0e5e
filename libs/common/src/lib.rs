//! Shared utilities for the stepdrive workspace
//!
//! - logging bootstrap (tracing-subscriber)
//! - hex rendering for frame dumps

pub mod hex;
pub mod logging;

pub use logging::LogConfig;
