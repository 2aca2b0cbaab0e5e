//! Oriental Motor CRK525 drive
//!
//! 16-bit big-endian registers, RS-485 control. Positioning uses operation
//! data No. 0 (M0): the target goes into the position register and a Start
//! edge on cmd1 runs the move.

pub mod behavior;
pub mod registers;

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use errors::{DriveError, DriveResult};
use stepdrive_link::{RegisterDirectory, Transport, Width};
use tracing::{debug, info};

use crate::controller::{
    BaseAngleFamily, ControllerCore, ControllerId, ResetDependency, ResetLock, StepperController,
};

pub use self::behavior::{Crk525Behavior, DEFAULT_BUSY_POLLS};
use self::registers::{addr, cmd1, driver_status, status1};

pub const TYPE_NAME: &str = "CRK525";

/// Diagnostic value sent before the initialisation writes
pub const INIT_TEST_VALUE: u16 = 0x1234;

/// Reset reported after the drive was power cycled
pub const POWER_CYCLE: &str = "power-cycle";
/// Reset reported after all data was re-initialised
pub const ALL_DATA_INIT: &str = "all-data-init";

/// One-shot actions of the maintenance area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaintenanceCommand {
    ResetAlarm,
    ClearAlarmRecords,
    ClearWarningRecords,
    BatchNvRead,
    BatchNvWrite,
    AllDataInit,
    PresetPosition,
    ClearCommErrorRecords,
    PresetEncoder,
    ClearCounter,
    OperationDataInit,
    ApplicationParamInit,
    SystemParamInit,
}

impl MaintenanceCommand {
    pub const ALL: [MaintenanceCommand; 13] = [
        Self::ResetAlarm,
        Self::ClearAlarmRecords,
        Self::ClearWarningRecords,
        Self::BatchNvRead,
        Self::BatchNvWrite,
        Self::AllDataInit,
        Self::PresetPosition,
        Self::ClearCommErrorRecords,
        Self::PresetEncoder,
        Self::ClearCounter,
        Self::OperationDataInit,
        Self::ApplicationParamInit,
        Self::SystemParamInit,
    ];

    pub fn address(self) -> u16 {
        match self {
            Self::ResetAlarm => addr::RESET_ALARM,
            Self::ClearAlarmRecords => addr::CLEAR_ALARM_RECORDS,
            Self::ClearWarningRecords => addr::CLEAR_WARNING_RECORDS,
            Self::BatchNvRead => addr::BATCH_NV_READ,
            Self::BatchNvWrite => addr::BATCH_NV_WRITE,
            Self::AllDataInit => addr::ALL_DATA_INIT,
            Self::PresetPosition => addr::PRESET_POSITION,
            Self::ClearCommErrorRecords => addr::CLEAR_COMM_ERROR_RECORDS,
            Self::PresetEncoder => addr::PRESET_ENCODER,
            Self::ClearCounter => addr::CLEAR_COUNTER,
            Self::OperationDataInit => addr::OPERATION_DATA_INIT,
            Self::ApplicationParamInit => addr::APPLICATION_PARAM_INIT,
            Self::SystemParamInit => addr::SYSTEM_PARAM_INIT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResetAlarm => "reset-alarm",
            Self::ClearAlarmRecords => "clear-alarm-records",
            Self::ClearWarningRecords => "clear-warning-records",
            Self::BatchNvRead => "batch-nv-read",
            Self::BatchNvWrite => "batch-nv-write",
            Self::AllDataInit => "all-data-init",
            Self::PresetPosition => "preset-position",
            Self::ClearCommErrorRecords => "clear-comm-error-records",
            Self::PresetEncoder => "preset-encoder",
            Self::ClearCounter => "clear-counter",
            Self::OperationDataInit => "operation-data-init",
            Self::ApplicationParamInit => "application-param-init",
            Self::SystemParamInit => "system-param-init",
        }
    }

    /// Initialisations that only take effect after a power cycle
    fn needs_power_cycle(self) -> bool {
        matches!(self, Self::AllDataInit | Self::SystemParamInit)
    }
}

impl fmt::Display for MaintenanceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaintenanceCommand {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == normalized)
            .ok_or_else(|| DriveError::InvalidParameter {
                param: "maintenance".to_string(),
                reason: format!("unknown command '{s}'"),
            })
    }
}

pub struct Crk525 {
    core: ControllerCore,
    internal_processing: AtomicBool,
    system_reload: Arc<ResetLock>,
    power_cycle: Arc<ResetDependency>,
    all_data_init: Arc<ResetDependency>,
}

impl Crk525 {
    pub fn new(id: ControllerId, transport: Arc<dyn Transport>) -> DriveResult<Arc<Self>> {
        let directory = RegisterDirectory::from_registers(registers::register_table())?;
        let all_data_init = ResetDependency::new(ALL_DATA_INIT);
        let power_cycle =
            ResetDependency::with_overrides(POWER_CYCLE, vec![Arc::clone(&all_data_init)]);

        let controller = Arc::new_cyclic(|weak: &Weak<Crk525>| {
            let handle: Weak<dyn StepperController> = weak.clone();
            Self {
                core: ControllerCore::new(id, TYPE_NAME, Width::Word, directory, transport, handle),
                internal_processing: AtomicBool::new(false),
                system_reload: ResetLock::new("system-reload"),
                power_cycle: Arc::clone(&power_cycle),
                all_data_init: Arc::clone(&all_data_init),
            }
        });

        let core = &controller.core;
        core.base_angles().add_family(
            core.directory(),
            BaseAngleFamily::new(
                registers::BASE_ANGLE_036,
                registers::step_angle_036(),
                registers::PARTITIONS_036.to_vec(),
            ),
        )?;
        core.base_angles().add_family(
            core.directory(),
            BaseAngleFamily::new(
                registers::BASE_ANGLE_072,
                registers::step_angle_072(),
                registers::PARTITIONS_072.to_vec(),
            ),
        )?;
        core.resets().register(all_data_init)?;
        core.resets().register(power_cycle)?;

        debug!("{} created", core.label());
        Ok(controller)
    }

    /// Constructor registered with the factory
    pub fn create(id: ControllerId, transport: Arc<dyn Transport>) -> DriveResult<Arc<dyn StepperController>> {
        Ok(Self::new(id, transport)? as Arc<dyn StepperController>)
    }

    /// Set between a position write and the release of busy-dependent work
    pub fn is_internal_processing(&self) -> bool {
        self.internal_processing.load(Ordering::Acquire)
    }

    /// Locked while a system area write waits for a power cycle
    pub fn system_reload_lock(&self) -> &Arc<ResetLock> {
        &self.system_reload
    }

    /// Run a maintenance action by writing its execute flag
    pub fn maintenance(&self, command: MaintenanceCommand) -> DriveResult<()> {
        self.write_single(command.address(), registers::EXECUTE)?;
        if command.needs_power_cycle() {
            self.all_data_init.add(&self.system_reload);
            self.power_cycle.add(&self.system_reload);
        }
        info!("{} maintenance '{}' executed", self.core.label(), command);
        Ok(())
    }

    /// Write the rotation direction (system area, applied after a power cycle)
    pub fn set_rotation_direction(&self, clockwise: bool) -> DriveResult<()> {
        let value = if clockwise {
            registers::ROTATION_CW
        } else {
            registers::ROTATION_CCW
        };
        self.write_single(addr::ROTATION_DIRECTION, value)
    }

    /// Present alarm code from the driver status register
    pub fn read_alarm_code(&self) -> DriveResult<u8> {
        let status = self.core.read_register(addr::DRIVER_STATUS)? as u32;
        Ok(driver_status::alarm_code(status))
    }

    fn write_single(&self, address: u16, value: i64) -> DriveResult<()> {
        self.core.write_single(address, value)?;
        self.register_written(address);
        Ok(())
    }

    fn write_cmd1(&self, flags: u32) -> DriveResult<()> {
        self.write_single(addr::CMD1, i64::from(flags))
    }
}

impl StepperController for Crk525 {
    fn core(&self) -> &ControllerCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn initialize_impl(&self) -> DriveResult<()> {
        self.core.test_connection(INIT_TEST_VALUE)?;
        self.write_single(addr::START_INPUT_MODE, registers::INPUT_RS485)?;
        self.write_single(addr::IO_STOP_INPUT, registers::DISABLE)?;
        self.set_rotation_direction(false)?;
        self.core.write_values(
            addr::EXCITATION_INPUT_MODE,
            &[registers::INPUT_RS485; 3],
        )?;
        Ok(())
    }

    fn write_position_impl(&self, position: i64) -> DriveResult<()> {
        self.internal_processing.store(true, Ordering::Release);
        let result = (|| {
            self.write_cmd1(cmd1::M0 | cmd1::C_ON)?;
            self.core.write_values(addr::POSITION, &[position])?;
            self.write_cmd1(cmd1::START | cmd1::M0 | cmd1::C_ON)
        })();
        if result.is_err() {
            self.internal_processing.store(false, Ordering::Release);
        }
        result
    }

    fn write_step_speed_impl(&self, speed: u32) -> DriveResult<()> {
        self.core.write_values(addr::OPERATING_SPEED, &[i64::from(speed)])
    }

    fn is_motor_busy(&self) -> DriveResult<bool> {
        let _busy = self.core.busy_lock();
        let status = self.core.read_register(addr::STATUS1)? as u32;
        Ok(status & status1::MOVE != 0)
    }

    fn permit_pos_write_impl(&self) -> DriveResult<()> {
        let flags = if self.core.cached_energized() {
            cmd1::M0 | cmd1::C_ON
        } else {
            cmd1::M0
        };
        self.write_cmd1(flags)
    }

    fn permit_busy_dependent_processes_impl(&self) -> DriveResult<()> {
        let _busy = self.core.busy_lock();
        self.internal_processing.store(false, Ordering::Release);
        Ok(())
    }

    fn set_resting_energized_impl(&self, energized: bool) -> DriveResult<()> {
        self.write_cmd1(if energized { cmd1::C_ON } else { 0 })
    }

    fn get_resting_energized_impl(&self) -> DriveResult<bool> {
        let status = self.core.read_register(addr::DRIVER_STATUS)? as u32;
        Ok(status & driver_status::ENABLE != 0)
    }

    fn register_written(&self, address: u16) {
        if registers::is_system_area(address) {
            self.power_cycle.add(&self.system_reload);
        }
    }
}

impl fmt::Debug for Crk525 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crk525")
            .field("core", &self.core)
            .field("internal_processing", &self.is_internal_processing())
            .field("pending_resets", &self.pending_resets())
            .finish()
    }
}
