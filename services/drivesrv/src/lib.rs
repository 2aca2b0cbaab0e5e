//! Drive Service Library
//!
//! Stepper drive controllers on a shared RS-485 bus.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   DriveConfig   │───►│    DriveHub     │───►│   Controllers   │
//! │ (YAML + env)    │    │ factory/monitor │    │   (CRK525 ...)  │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!                                 │                       │
//!                                 ▼                       ▼
//!                        ┌─────────────────┐    ┌─────────────────┐
//!                        │   BusyMonitor   │    │    Transport    │
//!                        │ (poll thread)   │    │ serial/simulated│
//!                        └─────────────────┘    └─────────────────┘
//! ```
//!
//! - **`controller`**: the `StepperController` trait, shared core state,
//!   base-angle selection and reset dependencies
//! - **`crk525`**: Oriental Motor CRK525 register map and controller
//! - **`monitor`**: background scheduler restoring write permission once a
//!   move finishes
//! - **`factory`** / **`hub`**: controller construction and ownership
//! - **`config`**: figment-layered configuration

pub mod config;
pub mod controller;
pub mod crk525;
pub mod factory;
pub mod hub;
pub mod monitor;

pub use config::{ControllerConfig, DriveConfig, TransportConfig, TransportKind};
pub use controller::{
    nearest_partition, steps_for_travel, ControllerCore, ControllerId, PartitionChange,
    StepperController, WriteOutcome,
};
pub use crk525::{Crk525, MaintenanceCommand};
pub use factory::{ControllerConstructor, ControllerFactory};
pub use hub::DriveHub;
pub use monitor::{BusyMonitor, MonitorStatus, DEFAULT_TICK_MS};
