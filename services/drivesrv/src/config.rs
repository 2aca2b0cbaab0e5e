//! Drive service configuration
//!
//! Layered with figment: built-in defaults, then the YAML file, then
//! `STEPDRIVE_` environment variables (`__` separates nested keys, e.g.
//! `STEPDRIVE_TRANSPORT__BAUD_RATE=19200`).

use std::collections::HashSet;
use std::path::Path;

use common::logging::LogConfig;
use errors::{config_error, DriveResult};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use stepdrive_link::SerialSettings;

use crate::crk525::DEFAULT_BUSY_POLLS;
use crate::monitor::DEFAULT_TICK_MS;

pub const ENV_PREFIX: &str = "STEPDRIVE_";
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Valid unicast bus addresses
pub const MIN_BUS_ADDRESS: u8 = 1;
pub const MAX_BUS_ADDRESS: u8 = 247;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Serial,
    /// In-process simulated drives, one per configured controller
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    #[serde(flatten)]
    pub serial: SerialSettings,
    /// Status reads that still report Move after a start (simulated only)
    pub busy_polls: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Serial,
            serial: SerialSettings {
                port: DEFAULT_PORT.to_string(),
                ..SerialSettings::default()
            },
            busy_polls: DEFAULT_BUSY_POLLS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

/// One drive on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    pub type_name: String,
    pub bus_address: u8,
    /// Step periods to wait before the first busy poll after a move
    #[serde(default)]
    pub monitor_threshold: u32,
    /// Operating speed in steps per second, written after initialisation
    #[serde(default)]
    pub step_speed: Option<u32>,
    /// Base angle family of the attached motor
    #[serde(default)]
    pub base_angle: Option<f64>,
    /// Run the drive's initialisation sequence when the hub starts
    #[serde(default = "default_initialize")]
    pub initialize: bool,
}

fn default_initialize() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DriveConfig {
    pub transport: TransportConfig,
    pub monitor: MonitorConfig,
    pub logging: LogConfig,
    pub controllers: Vec<ControllerConfig>,
}

impl DriveConfig {
    /// Figment with every layer; exposed so callers can add their own
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(DriveConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load, then validate
    pub fn load(path: Option<&Path>) -> DriveResult<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(config_error!("config file not found: {}", path.display()));
            }
        }
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> DriveResult<Self> {
        let config: DriveConfig = figment
            .extract()
            .map_err(|e| config_error!("failed to load configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DriveResult<()> {
        if self.transport.kind == TransportKind::Serial && self.transport.serial.port.trim().is_empty() {
            return Err(config_error!("transport.port must be set for a serial transport"));
        }
        if self.transport.serial.timeout_ms == 0 {
            return Err(config_error!("transport.timeout_ms must be at least 1"));
        }
        if self.monitor.tick_ms == 0 {
            return Err(config_error!("monitor.tick_ms must be at least 1"));
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for controller in &self.controllers {
            if controller.name.trim().is_empty() {
                return Err(config_error!("controller name must not be empty"));
            }
            if !names.insert(controller.name.as_str()) {
                return Err(config_error!("duplicate controller name '{}'", controller.name));
            }
            if !(MIN_BUS_ADDRESS..=MAX_BUS_ADDRESS).contains(&controller.bus_address) {
                return Err(config_error!(
                    "controller '{}': bus address {} outside {}..={}",
                    controller.name,
                    controller.bus_address,
                    MIN_BUS_ADDRESS,
                    MAX_BUS_ADDRESS
                ));
            }
            if !addresses.insert(controller.bus_address) {
                return Err(config_error!(
                    "controller '{}': bus address {} already in use",
                    controller.name,
                    controller.bus_address
                ));
            }
        }
        Ok(())
    }

    pub fn controller(&self, name: &str) -> Option<&ControllerConfig> {
        self.controllers.iter().find(|c| c.name == name)
    }

    /// Effective configuration as YAML, loadable again with [`DriveConfig::load`]
    pub fn to_yaml(&self) -> DriveResult<String> {
        serde_yaml::to_string(self).map_err(|e| config_error!("failed to render configuration: {}", e))
    }
}
