//! State shared by every concrete controller
//!
//! Concrete controllers embed a [`ControllerCore`] and expose it through
//! [`StepperController::core`]; the provided trait methods keep their gating
//! state here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use errors::{DriveError, DriveResult};
use parking_lot::{Mutex, MutexGuard, RwLock};
use stepdrive_link::{Frame, FrameCodec, Register, RegisterDirectory, Transport, Width};
use tracing::{debug, warn};

use super::base_angle::BaseAngleTable;
use super::reset::ResetRegistry;
use super::StepperController;
use crate::monitor::BusyMonitor;

/// Process-unique controller identifier, allocated by the factory
pub type ControllerId = u64;

/// Default step period before a speed has been written
pub const DEFAULT_STEP_PERIOD_US: u32 = 10;

/// Busy-monitor bookkeeping, guarded by its own lock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorTiming {
    pub step_period_us: u32,
    pub accumulator: f64,
    pub threshold: u32,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        Self {
            step_period_us: DEFAULT_STEP_PERIOD_US,
            accumulator: 0.0,
            threshold: 0,
        }
    }
}

pub struct ControllerCore {
    id: ControllerId,
    type_name: String,
    bus_address: RwLock<Option<u8>>,
    base_width: Width,
    directory: RegisterDirectory,
    transport: Arc<dyn Transport>,
    write_permitted: AtomicBool,
    energized: AtomicBool,
    initialized: AtomicBool,
    busy_lock: Mutex<()>,
    timing: Mutex<MonitorTiming>,
    base_angles: BaseAngleTable,
    resets: ResetRegistry,
    handle: Weak<dyn StepperController>,
    monitor: Mutex<Option<BusyMonitor>>,
}

impl ControllerCore {
    pub fn new(
        id: ControllerId,
        type_name: impl Into<String>,
        base_width: Width,
        directory: RegisterDirectory,
        transport: Arc<dyn Transport>,
        handle: Weak<dyn StepperController>,
    ) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            bus_address: RwLock::new(None),
            base_width,
            directory,
            transport,
            write_permitted: AtomicBool::new(true),
            energized: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            busy_lock: Mutex::new(()),
            timing: Mutex::new(MonitorTiming::default()),
            base_angles: BaseAngleTable::new(),
            resets: ResetRegistry::new(),
            handle,
            monitor: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// `TYPE#id`, used in logs and errors
    pub fn label(&self) -> String {
        format!("{}#{}", self.type_name, self.id)
    }

    // ========================================================================
    // Addressing & frame exchange
    // ========================================================================

    pub fn bus_address(&self) -> Option<u8> {
        *self.bus_address.read()
    }

    /// Fix the bus address; only allowed before initialisation
    pub fn set_bus_address(&self, address: u8) -> DriveResult<()> {
        if self.is_initialized() {
            return Err(DriveError::AlreadyInitialized(self.label()));
        }
        *self.bus_address.write() = Some(address);
        debug!("{} bus address set to {}", self.label(), address);
        Ok(())
    }

    pub fn codec(&self) -> DriveResult<FrameCodec> {
        let address = self
            .bus_address()
            .ok_or_else(|| DriveError::Unconfigured(format!("{} has no bus address", self.label())))?;
        Ok(FrameCodec::new(address).with_base_width(self.base_width))
    }

    pub fn directory(&self) -> &RegisterDirectory {
        &self.directory
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn base_width(&self) -> Width {
        self.base_width
    }

    /// One blocking round trip; the response is applied to the directory
    pub fn exchange(&self, codec: &FrameCodec, request: &Frame) -> DriveResult<()> {
        codec.exchange(self.transport.as_ref(), request, &self.directory)
    }

    pub fn test_connection(&self, test_value: u16) -> DriveResult<()> {
        let codec = self.codec()?;
        let request = codec.diagnostic_request(test_value)?;
        self.exchange(&codec, &request)
    }

    /// Single register write of `value` to the register at `address`
    pub fn write_single(&self, address: u16, value: i64) -> DriveResult<()> {
        let codec = self.codec()?;
        let register = self.directory.get(address)?;
        let request = codec.single_write_request(&register, value)?;
        self.exchange(&codec, &request)
    }

    /// Multi register write of raw bytes starting at `start`
    pub fn write_multi(&self, start: u16, values: &[u8]) -> DriveResult<()> {
        let codec = self.codec()?;
        let request = codec.multi_write_request(&self.directory, start, values)?;
        self.exchange(&codec, &request)
    }

    /// Encode logical values for consecutive registers starting at `start`
    ///
    /// Each value is range-checked against its register and encoded at that
    /// register's width.
    pub fn encode_values(&self, start: u16, values: &[i64]) -> DriveResult<Vec<u8>> {
        let mut out = Vec::with_capacity(values.len() * 4);
        let mut address = start;
        for value in values {
            let (bytes, len, slots) = self.directory.with_register(address, |register| {
                let mut buf = [0u8; 4];
                let len = register.encode_candidate(*value, &mut buf)?;
                Ok::<_, DriveError>((buf, len, register.slots(self.base_width)?))
            })??;
            out.extend_from_slice(&bytes[..len]);
            address = address
                .checked_add(slots as u16)
                .ok_or(DriveError::UnknownRegister(u16::MAX))?;
        }
        Ok(out)
    }

    /// Multi register write of logical values starting at `start`
    pub fn write_values(&self, start: u16, values: &[i64]) -> DriveResult<()> {
        let bytes = self.encode_values(start, values)?;
        self.write_multi(start, &bytes)
    }

    /// Read `count` base-width registers starting at `start`
    pub fn read(&self, start: u16, count: u16) -> DriveResult<()> {
        let codec = self.codec()?;
        let request = codec.read_request(start, count)?;
        self.exchange(&codec, &request)
    }

    /// Read one register (all of its slots) and return the fresh value
    pub fn read_register(&self, address: u16) -> DriveResult<i64> {
        let slots = self
            .directory
            .with_register(address, |register| register.slots(self.base_width))??;
        self.read(address, slots as u16)?;
        self.directory.value(address)
    }

    pub fn register(&self, address: u16) -> DriveResult<Register> {
        self.directory.get(address)
    }

    // ========================================================================
    // Write permission & cached state
    // ========================================================================

    pub fn is_write_permitted(&self) -> bool {
        self.write_permitted.load(Ordering::Acquire)
    }

    /// Take the write permission; false when another write holds it
    pub fn claim_write_permission(&self) -> bool {
        self.write_permitted
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn set_write_permitted(&self, permitted: bool) {
        self.write_permitted.store(permitted, Ordering::Release);
    }

    pub fn cached_energized(&self) -> bool {
        self.energized.load(Ordering::Acquire)
    }

    pub fn set_cached_energized(&self, energized: bool) {
        self.energized.store(energized, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Claim the one-time initialisation; fails if already claimed
    pub(crate) fn begin_initialization(&self) -> DriveResult<()> {
        self.initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| DriveError::AlreadyInitialized(self.label()))
    }

    pub(crate) fn abort_initialization(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    /// Serialises busy polls and busy-dependent releases
    pub fn busy_lock(&self) -> MutexGuard<'_, ()> {
        self.busy_lock.lock()
    }

    // ========================================================================
    // Monitor timing
    // ========================================================================

    pub fn timing(&self) -> MonitorTiming {
        *self.timing.lock()
    }

    pub fn step_period_us(&self) -> u32 {
        self.timing.lock().step_period_us
    }

    pub fn set_step_period_us(&self, period_us: u32) {
        self.timing.lock().step_period_us = period_us.max(1);
    }

    pub fn monitor_threshold(&self) -> u32 {
        self.timing.lock().threshold
    }

    pub fn set_monitor_threshold(&self, threshold: u32) {
        self.timing.lock().threshold = threshold;
    }

    /// Add elapsed step periods; returns true once past the threshold
    pub fn advance_monitor_time(&self, step_periods: f64) -> bool {
        let mut timing = self.timing.lock();
        timing.accumulator += step_periods;
        timing.accumulator > f64::from(timing.threshold)
    }

    pub fn restart_monitor_time(&self) {
        self.timing.lock().accumulator = 0.0;
    }

    // ========================================================================
    // Collaborators
    // ========================================================================

    pub fn base_angles(&self) -> &BaseAngleTable {
        &self.base_angles
    }

    pub fn resets(&self) -> &ResetRegistry {
        &self.resets
    }

    /// Weak handle to the controller that owns this core
    pub fn handle(&self) -> Weak<dyn StepperController> {
        self.handle.clone()
    }

    pub fn attach_monitor(&self, monitor: BusyMonitor) {
        *self.monitor.lock() = Some(monitor);
    }

    pub fn monitor(&self) -> Option<BusyMonitor> {
        self.monitor.lock().clone()
    }
}

impl Drop for ControllerCore {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            if monitor.remove_id(self.id).is_ok() {
                warn!("{} dropped while monitored; entry removed", self.label());
            }
        }
    }
}

impl std::fmt::Debug for ControllerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerCore")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("bus_address", &self.bus_address())
            .field("write_permitted", &self.is_write_permitted())
            .field("initialized", &self.is_initialized())
            .field("transport", &self.transport.describe())
            .finish()
    }
}
