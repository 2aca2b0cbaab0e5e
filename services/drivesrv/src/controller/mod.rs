//! Controller interface
//!
//! A concrete drive implements the device hooks of [`StepperController`];
//! the provided methods carry the gating logic shared by every drive
//! (write permission, monitor registration, step period bookkeeping,
//! base-angle selection and reset dependencies).
//!
//! # Write cycle
//!
//! ```text
//! write_position ──claim permission──> write_position_impl ──> monitor.add_controller
//!        │                                                          │
//!   Deferred (busy)                           busy clears ─> permit_busy_dependent_processes
//! ```

pub mod base_angle;
pub mod core;
pub mod reset;

use std::any::Any;
use std::sync::Arc;

use errors::{validation_error, DriveError, DriveResult};
use tracing::{debug, info, warn};

pub use self::base_angle::{nearest_partition, BaseAngleFamily, BaseAngleTable, PartitionChange};
pub use self::core::{ControllerCore, ControllerId, MonitorTiming, DEFAULT_STEP_PERIOD_US};
pub use self::reset::{ResetDependency, ResetLock, ResetRegistry};

/// Upper bound for `write_step_speed`, in steps per second
pub const MAX_STEP_SPEED: u32 = 1_000_000;

/// Result of a position write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The position was sent and the controller is now monitored
    Accepted,
    /// A previous move is still in progress; retry later
    Deferred,
}

impl WriteOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Steps needed to move `delta_um` micrometres
///
/// `single_rotation_travel_um` is the linear travel of one shaft rotation and
/// `partition_deg` the active step angle. The result truncates towards zero.
pub fn steps_for_travel(
    delta_um: f64,
    single_rotation_travel_um: f64,
    partition_deg: f64,
) -> DriveResult<i64> {
    if single_rotation_travel_um <= 0.0 || !single_rotation_travel_um.is_finite() {
        return Err(validation_error!(
            "single_rotation_travel_um",
            format!("must be positive, got {single_rotation_travel_um}")
        ));
    }
    if partition_deg <= 0.0 || !partition_deg.is_finite() {
        return Err(validation_error!(
            "partition_deg",
            format!("must be positive, got {partition_deg}")
        ));
    }
    let degrees = delta_um * 360.0 / single_rotation_travel_um;
    Ok((degrees / partition_deg).trunc() as i64)
}

/// A stepper drive on the bus
///
/// Implementations must be cheap to share: controllers live in an `Arc` and
/// are called from application threads and the busy monitor concurrently.
pub trait StepperController: Send + Sync {
    fn core(&self) -> &ControllerCore;

    /// Downcast access to drive-specific operations
    fn as_any(&self) -> &dyn Any;

    // ========================================================================
    // Device hooks
    // ========================================================================

    /// Put the drive into a known operating mode
    fn initialize_impl(&self) -> DriveResult<()>;

    /// Send the target position and start the move
    fn write_position_impl(&self, position: i64) -> DriveResult<()>;

    fn write_step_speed_impl(&self, speed: u32) -> DriveResult<()>;

    /// Poll the drive; true while the motor is moving
    fn is_motor_busy(&self) -> DriveResult<bool>;

    fn permit_pos_write_impl(&self) -> DriveResult<()>;

    fn permit_busy_dependent_processes_impl(&self) -> DriveResult<()>;

    fn set_resting_energized_impl(&self, energized: bool) -> DriveResult<()>;

    fn get_resting_energized_impl(&self) -> DriveResult<bool>;

    /// Called after every successful register write issued through the
    /// provided methods; drives use it to track reset dependencies
    fn register_written(&self, _address: u16) {}

    // ========================================================================
    // Identity
    // ========================================================================

    fn id(&self) -> ControllerId {
        self.core().id()
    }

    fn type_name(&self) -> &str {
        self.core().type_name()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Run the drive's initialisation sequence; allowed once per instance
    fn initialize_physical_controller(&self) -> DriveResult<()> {
        let core = self.core();
        core.codec()?;
        core.begin_initialization()?;
        match self.initialize_impl() {
            Ok(()) => {
                info!("{} initialized at bus address {:?}", core.label(), core.bus_address());
                Ok(())
            },
            Err(e) => {
                core.abort_initialization();
                warn!("{} initialization failed: {}", core.label(), e);
                Err(e)
            },
        }
    }

    /// Diagnostic round trip; registers are left untouched
    fn test_connection(&self, test_value: u16) -> DriveResult<()> {
        self.core().test_connection(test_value)
    }

    // ========================================================================
    // Motion
    // ========================================================================

    /// Send a target position
    ///
    /// Returns [`WriteOutcome::Deferred`] without touching the drive while a
    /// previous move still holds the write permission. On success the
    /// controller is handed to its busy monitor, which restores the
    /// permission once the motor stops.
    fn write_position(&self, position: i64) -> DriveResult<WriteOutcome> {
        let core = self.core();
        let monitor = core
            .monitor()
            .ok_or_else(|| DriveError::Unconfigured(format!("{} has no busy monitor", core.label())))?;

        if !core.claim_write_permission() {
            debug!("{} position write deferred, move in progress", core.label());
            return Ok(WriteOutcome::Deferred);
        }

        if let Err(e) = self.write_position_impl(position) {
            core.set_write_permitted(true);
            return Err(e);
        }

        // Without a handle nothing would ever restore the permission
        let Some(handle) = core.handle().upgrade() else {
            core.set_write_permitted(true);
            return Err(DriveError::Internal(format!("{} handle is gone", core.label())));
        };
        match monitor.add_controller(&handle) {
            Ok(()) => {},
            Err(DriveError::AlreadyMonitored(label)) => {
                warn!("{} was still monitored when a new move started", label);
            },
            Err(e) => return Err(e),
        }
        debug!("{} moving to {}", core.label(), position);
        Ok(WriteOutcome::Accepted)
    }

    /// Set the operating speed in steps per second
    fn write_step_speed(&self, speed: u32) -> DriveResult<()> {
        if speed == 0 || speed > MAX_STEP_SPEED {
            return Err(validation_error!(
                "speed",
                format!("must be within 1..={MAX_STEP_SPEED}, got {speed}")
            ));
        }
        self.write_step_speed_impl(speed)?;
        self.core().set_step_period_us(MAX_STEP_SPEED / speed);
        Ok(())
    }

    fn permit_pos_write(&self) -> DriveResult<()> {
        self.permit_pos_write_impl()?;
        self.core().set_write_permitted(true);
        Ok(())
    }

    /// Release everything that waited for the motor to stop
    fn permit_busy_dependent_processes(&self) -> DriveResult<()> {
        self.permit_pos_write()?;
        self.permit_busy_dependent_processes_impl()
    }

    fn is_write_permitted(&self) -> bool {
        self.core().is_write_permitted()
    }

    // ========================================================================
    // Excitation
    // ========================================================================

    /// Energise (or release) the motor while at rest
    ///
    /// With `use_hardware` unset only the cached flag changes; it is applied
    /// by the next write that carries the excitation bit.
    fn set_resting_energized(&self, energized: bool, use_hardware: bool) -> DriveResult<()> {
        if use_hardware {
            self.set_resting_energized_impl(energized)?;
        }
        self.core().set_cached_energized(energized);
        Ok(())
    }

    fn resting_energized(&self, use_hardware: bool) -> DriveResult<bool> {
        if !use_hardware {
            return Ok(self.core().cached_energized());
        }
        let energized = self.get_resting_energized_impl()?;
        self.core().set_cached_energized(energized);
        Ok(energized)
    }

    // ========================================================================
    // Base angle
    // ========================================================================

    fn base_angle_options(&self) -> Vec<f64> {
        self.core().base_angles().angles()
    }

    fn base_angle_partition_options(&self, angle: f64) -> DriveResult<Vec<f64>> {
        self.core().base_angles().partitions(angle)
    }

    fn current_base_angle(&self) -> Option<f64> {
        self.core().base_angles().active_angle()
    }

    fn current_base_angle_partition(&self) -> Option<f64> {
        self.core().base_angles().current_partition()
    }

    /// Read the partition register of the active family from the drive
    fn read_base_angle_partition(&self) -> DriveResult<f64> {
        let core = self.core();
        let table = core.base_angles();
        let (address, _) = table.active_family()?;
        let raw = core.read_register(address)?;
        let partition = table.partition_from_raw(raw)?;
        table.set_current_partition(partition);
        Ok(partition)
    }

    /// Switch to the base angle family for `angle` and re-read its partition
    fn set_base_angle_option(&self, angle: f64) -> DriveResult<f64> {
        let core = self.core();
        core.base_angles().activate(core.directory(), angle)?;
        let partition = self.read_base_angle_partition()?;
        info!("{} base angle {}°, partition {}°", core.label(), angle, partition);
        Ok(partition)
    }

    /// Move the partition towards `requested`, snapping to the nearest option
    /// on that side of the current partition
    fn set_base_angle_partition(&self, requested: f64) -> DriveResult<PartitionChange> {
        let core = self.core();
        let table = core.base_angles();
        let (address, options) = table.active_family()?;
        let current = match table.current_partition() {
            Some(partition) => partition,
            None => self.read_base_angle_partition()?,
        };

        let change = nearest_partition(&options, current, requested);
        if let PartitionChange::Changed(partition) = change {
            let raw = table.raw_for_partition(partition)?;
            core.write_single(address, raw)?;
            table.set_current_partition(partition);
            self.register_written(address);
        }
        debug!("{} partition {} (requested {}°)", core.label(), change, requested);
        Ok(change)
    }

    // ========================================================================
    // Registers
    // ========================================================================

    /// Read `count` base-width registers from the drive into the directory
    fn read_registers(&self, start: u16, count: u16) -> DriveResult<()> {
        self.core().read(start, count)
    }

    /// Last confirmed value of the register at `address`
    fn register_value(&self, address: u16) -> DriveResult<i64> {
        self.core().directory().value(address)
    }

    // ========================================================================
    // Reset dependencies
    // ========================================================================

    fn register_reset_dependency(&self, dependency: Arc<ResetDependency>) -> DriveResult<()> {
        self.core().resets().register(dependency)
    }

    fn pending_resets(&self) -> Vec<String> {
        self.core().resets().pending()
    }

    /// Report that the reset identified by `tag` was performed
    fn reset_dependency(&self, tag: &str) -> DriveResult<()> {
        self.core().resets().reset_dependency(tag)?;
        info!("{} reset '{}' reported", self.core().label(), tag);
        Ok(())
    }

    fn reset_all_dependencies(&self) {
        self.core().resets().reset_all();
    }
}

impl std::fmt::Debug for dyn StepperController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.core(), f)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::monitor::BusyMonitor;
    use std::sync::Weak;
    use stepdrive_link::{RegisterDirectory, SimulatedBus, Width};

    /// Controller whose core holds no live handle to it
    struct Unhandled {
        core: ControllerCore,
    }

    impl Unhandled {
        fn new() -> Self {
            let handle: Weak<dyn StepperController> = Weak::<Unhandled>::new();
            let core = ControllerCore::new(
                7,
                "UNHANDLED",
                Width::Word,
                RegisterDirectory::new(),
                Arc::new(SimulatedBus::new()),
                handle,
            );
            Self { core }
        }
    }

    impl StepperController for Unhandled {
        fn core(&self) -> &ControllerCore {
            &self.core
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn initialize_impl(&self) -> DriveResult<()> {
            Ok(())
        }

        fn write_position_impl(&self, _position: i64) -> DriveResult<()> {
            Ok(())
        }

        fn write_step_speed_impl(&self, _speed: u32) -> DriveResult<()> {
            Ok(())
        }

        fn is_motor_busy(&self) -> DriveResult<bool> {
            Ok(false)
        }

        fn permit_pos_write_impl(&self) -> DriveResult<()> {
            Ok(())
        }

        fn permit_busy_dependent_processes_impl(&self) -> DriveResult<()> {
            Ok(())
        }

        fn set_resting_energized_impl(&self, _energized: bool) -> DriveResult<()> {
            Ok(())
        }

        fn get_resting_energized_impl(&self) -> DriveResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_missing_handle_restores_write_permission() {
        let controller = Unhandled::new();
        let monitor = BusyMonitor::default();
        controller.core().attach_monitor(monitor.clone());

        let err = controller.write_position(40).unwrap_err();
        assert!(matches!(err, DriveError::Internal(_)));
        assert!(controller.is_write_permitted());
        assert_eq!(monitor.list_size(), 0);
    }

    #[test]
    fn test_steps_for_travel() {
        // 100 um on a 500 um lead at 0.36°: 72° -> 200 steps
        assert_eq!(steps_for_travel(100.0, 500.0, 0.36).unwrap(), 200);
        assert_eq!(steps_for_travel(-100.0, 500.0, 0.36).unwrap(), -200);
        // Truncates towards zero
        assert_eq!(steps_for_travel(1.0, 500.0, 0.5).unwrap(), 1);
        assert_eq!(steps_for_travel(0.0, 500.0, 0.72).unwrap(), 0);
    }

    #[test]
    fn test_steps_for_travel_rejects_bad_geometry() {
        assert!(steps_for_travel(10.0, 0.0, 0.36).is_err());
        assert!(steps_for_travel(10.0, 500.0, -0.36).is_err());
        assert!(steps_for_travel(10.0, f64::NAN, 0.36).is_err());
    }

    #[test]
    fn test_write_outcome() {
        assert!(WriteOutcome::Accepted.is_accepted());
        assert!(!WriteOutcome::Deferred.is_accepted());
    }
}
