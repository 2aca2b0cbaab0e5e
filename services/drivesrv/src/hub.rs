//! Drive hub
//!
//! Owns the shared transport, the busy monitor and the controller factory,
//! and keeps the configured controllers by name.

use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use dashmap::DashMap;
use errors::{validation_error, DriveError, DriveResult};
use stepdrive_link::{SerialTransport, SimulatedBus, Transport};
use tracing::{info, warn};

use crate::config::{ControllerConfig, DriveConfig, TransportKind};
use crate::controller::StepperController;
use crate::crk525::Crk525Behavior;
use crate::factory::ControllerFactory;
use crate::monitor::{BusyMonitor, MonitorStatus};

pub struct DriveHub {
    transport: Arc<dyn Transport>,
    monitor: BusyMonitor,
    factory: ControllerFactory,
    controllers: DashMap<String, Arc<dyn StepperController>, RandomState>,
}

impl DriveHub {
    pub fn new(transport: Arc<dyn Transport>, monitor: BusyMonitor, factory: ControllerFactory) -> Self {
        Self {
            transport,
            monitor,
            factory,
            controllers: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Open the configured transport and create every configured controller
    ///
    /// The monitor is not started; call [`DriveHub::start`].
    pub fn from_config(config: &DriveConfig) -> DriveResult<Self> {
        config.validate()?;
        let transport: Arc<dyn Transport> = match config.transport.kind {
            TransportKind::Serial => Arc::new(SerialTransport::open(config.transport.serial.clone())?),
            TransportKind::Simulated => {
                let bus = SimulatedBus::new();
                for controller in &config.controllers {
                    bus.add_device_with_behavior(
                        controller.bus_address,
                        Crk525Behavior::memory(),
                        Crk525Behavior::new(config.transport.busy_polls),
                    );
                }
                Arc::new(bus)
            },
        };
        info!("Transport ready: {}", transport.describe());

        let monitor = BusyMonitor::new(Duration::from_millis(config.monitor.tick_ms));
        let hub = Self::new(transport, monitor, ControllerFactory::with_builtin());
        for controller in &config.controllers {
            hub.add_configured(controller)?;
        }
        Ok(hub)
    }

    /// Create a controller and attach it to the hub's monitor
    ///
    /// No bus traffic: the controller is addressed but not initialised.
    pub fn add_controller(
        &self,
        name: &str,
        type_name: &str,
        bus_address: u8,
    ) -> DriveResult<Arc<dyn StepperController>> {
        if self.controllers.contains_key(name) {
            return Err(validation_error!(
                "name",
                format!("controller '{name}' already exists")
            ));
        }
        let controller = self.factory.create_by_name(type_name, Arc::clone(&self.transport))?;
        controller.core().set_bus_address(bus_address)?;
        controller.core().attach_monitor(self.monitor.clone());
        self.controllers.insert(name.to_string(), Arc::clone(&controller));
        info!("Controller '{}' added ({} at {})", name, controller.type_name(), bus_address);
        Ok(controller)
    }

    /// Create a controller from its configuration; no bus traffic
    pub fn add_configured(&self, config: &ControllerConfig) -> DriveResult<Arc<dyn StepperController>> {
        let controller = self.add_controller(&config.name, &config.type_name, config.bus_address)?;
        controller.core().set_monitor_threshold(config.monitor_threshold);
        Ok(controller)
    }

    /// Bring a configured controller into its operating state
    ///
    /// Runs the initialisation sequence when requested, then writes the step
    /// speed and selects the base angle.
    pub fn apply_config(&self, config: &ControllerConfig) -> DriveResult<()> {
        let controller = self.controller(&config.name)?;
        if config.initialize && !controller.core().is_initialized() {
            controller.initialize_physical_controller()?;
        }
        if let Some(speed) = config.step_speed {
            controller.write_step_speed(speed)?;
        }
        if let Some(angle) = config.base_angle {
            controller.set_base_angle_option(angle)?;
        }
        Ok(())
    }

    /// Apply every controller's configuration, in file order
    pub fn apply_all(&self, config: &DriveConfig) -> DriveResult<()> {
        for controller in &config.controllers {
            self.apply_config(controller)?;
        }
        Ok(())
    }

    pub fn controller(&self, name: &str) -> DriveResult<Arc<dyn StepperController>> {
        self.controllers
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| DriveError::Unconfigured(format!("no controller named '{name}'")))
    }

    pub fn controller_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Detach a controller; it stops being monitored once dropped
    pub fn remove_controller(&self, name: &str) -> DriveResult<Arc<dyn StepperController>> {
        let (_, controller) = self
            .controllers
            .remove(name)
            .ok_or_else(|| DriveError::Unconfigured(format!("no controller named '{name}'")))?;
        if self.monitor.contains(controller.id()) {
            self.monitor.remove_controller(controller.as_ref())?;
        }
        info!("Controller '{}' removed", name);
        Ok(controller)
    }

    pub fn factory(&self) -> &ControllerFactory {
        &self.factory
    }

    pub fn monitor(&self) -> &BusyMonitor {
        &self.monitor
    }

    pub fn monitor_status(&self) -> MonitorStatus {
        self.monitor.status()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn start(&self) -> DriveResult<()> {
        self.monitor.start()
    }

    /// Stop the monitor; tracked moves stay write-locked until polled again
    pub fn shutdown(&self) {
        if !self.monitor.is_running() {
            return;
        }
        let tracked = self.monitor.list_size();
        if tracked > 0 {
            warn!("Shutting down with {} controller(s) still moving", tracked);
        }
        self.monitor.stop();
    }
}

impl Drop for DriveHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DriveHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveHub")
            .field("transport", &self.transport.describe())
            .field("monitor", &self.monitor)
            .field("controllers", &self.controller_names())
            .finish()
    }
}
