//! Simulated CRK525 drive for the in-process bus
//!
//! Reacts to the command register the way the drive does for the subset of
//! behaviour the controller relies on: a start command keeps the Move flags
//! set for a configurable number of status polls and then lands on the
//! target position; excitation mirrors into the driver status; maintenance
//! execute flags clear themselves.

use stepdrive_link::{DeviceBehavior, RegisterMemory, Width};

use super::registers::{
    addr, cmd1, driver_status, register_table, status1, status2, step_angle_036,
};

/// Status polls that report Move after a start, unless configured otherwise
pub const DEFAULT_BUSY_POLLS: u32 = 2;

// Positioning mode register values
const INCREMENTAL: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Motion {
    target: i32,
    remaining_polls: u32,
}

#[derive(Debug)]
pub struct Crk525Behavior {
    busy_polls: u32,
    motion: Option<Motion>,
    starts: u32,
}

impl Crk525Behavior {
    pub fn new(busy_polls: u32) -> Self {
        Self {
            busy_polls,
            motion: None,
            starts: 0,
        }
    }

    /// Register memory of a drive fresh from the factory
    ///
    /// Every register in the map is backed, with its default value.
    pub fn memory() -> RegisterMemory {
        let mut memory = RegisterMemory::new();
        for register in register_table().into_iter().chain([step_angle_036()]) {
            let raw = register.value() as u32;
            match register.width() {
                Width::DoubleWord => {
                    memory.map_range(register.address(), 2);
                    memory.set_u32(register.address(), raw);
                },
                _ => {
                    memory.map_range(register.address(), 1);
                    memory.set(register.address(), raw as u16);
                },
            }
        }
        memory.set(addr::STATUS1, status1::READY as u16);
        memory.set_u32(addr::DRIVER_STATUS, driver_status::READY);
        memory
    }

    /// Number of start commands seen
    pub fn starts(&self) -> u32 {
        self.starts
    }

    fn start_move(&mut self, memory: &mut RegisterMemory) {
        let requested = memory.get_u32(addr::POSITION).unwrap_or_default() as i32;
        let current = memory.get_u32(addr::COMMAND_POSITION).unwrap_or_default() as i32;
        let target = match memory.get(addr::POSITIONING_MODE) {
            Some(INCREMENTAL) | None => current.wrapping_add(requested),
            Some(_) => requested,
        };
        self.motion = Some(Motion {
            target,
            remaining_polls: self.busy_polls,
        });
        self.starts += 1;
        set_moving(memory, true);
    }

    fn apply_excitation(memory: &mut RegisterMemory, energized: bool) {
        let status = memory.get_u32(addr::DRIVER_STATUS).unwrap_or_default();
        let status = if energized {
            status | driver_status::ENABLE
        } else {
            status & !driver_status::ENABLE
        };
        memory.set_u32(addr::DRIVER_STATUS, status);

        let flags = memory.get(addr::STATUS2).unwrap_or_default();
        let flags = if energized {
            flags | status2::ENABLE as u16
        } else {
            flags & !(status2::ENABLE as u16)
        };
        memory.set(addr::STATUS2, flags);
    }

    fn run_maintenance(memory: &mut RegisterMemory, address: u16) {
        if memory.get(address) != Some(1) {
            return;
        }
        match address {
            addr::RESET_ALARM => {
                let status = memory.get_u32(addr::DRIVER_STATUS).unwrap_or_default();
                memory.set_u32(
                    addr::DRIVER_STATUS,
                    status & !(driver_status::ALM | driver_status::ALARM_CODE),
                );
                memory.set(addr::PRESENT_ALARM, 0);
            },
            addr::CLEAR_COUNTER => {
                memory.set_u32(addr::COMMAND_POSITION, 0);
                memory.set_u32(addr::ENCODER_COUNTER, 0);
            },
            addr::PRESET_POSITION => {
                let preset = memory.get_u32(addr::PRESET_POSITION_VALUE).unwrap_or_default();
                memory.set_u32(addr::COMMAND_POSITION, preset);
            },
            _ => {},
        }
        memory.set(address, 0);
    }
}

impl Default for Crk525Behavior {
    fn default() -> Self {
        Self::new(DEFAULT_BUSY_POLLS)
    }
}

fn covers(start: u16, count: u16, address: u16) -> bool {
    address >= start && u32::from(address) < u32::from(start) + u32::from(count)
}

fn set_moving(memory: &mut RegisterMemory, moving: bool) {
    let flags = memory.get(addr::STATUS1).unwrap_or_default();
    let flags = if moving {
        (flags | status1::MOVE as u16) & !(status1::READY as u16)
    } else {
        (flags & !(status1::MOVE as u16)) | status1::READY as u16
    };
    memory.set(addr::STATUS1, flags);

    let status = memory.get_u32(addr::DRIVER_STATUS).unwrap_or_default();
    let status = if moving {
        (status | driver_status::MOVE) & !driver_status::READY
    } else {
        (status & !driver_status::MOVE) | driver_status::READY
    };
    memory.set_u32(addr::DRIVER_STATUS, status);
}

impl DeviceBehavior for Crk525Behavior {
    fn after_write(&mut self, memory: &mut RegisterMemory, address: u16, count: u16) {
        if covers(address, count, addr::CMD1) {
            let command = u32::from(memory.get(addr::CMD1).unwrap_or_default());
            Self::apply_excitation(memory, command & cmd1::C_ON != 0);
            if command & cmd1::STOP != 0 {
                self.motion = None;
                set_moving(memory, false);
            } else if command & cmd1::START != 0 {
                self.start_move(memory);
            }
        }
        for maintenance in addr::RESET_ALARM..=addr::SYSTEM_PARAM_INIT {
            if covers(address, count, maintenance) {
                Self::run_maintenance(memory, maintenance);
            }
        }
    }

    fn before_read(&mut self, memory: &mut RegisterMemory, address: u16, count: u16) {
        let polls_status = covers(address, count, addr::STATUS1)
            || covers(address, count, addr::DRIVER_STATUS);
        if !polls_status {
            return;
        }
        let Some(motion) = self.motion.as_mut() else {
            return;
        };
        if motion.remaining_polls > 0 {
            motion.remaining_polls -= 1;
            return;
        }
        memory.set_u32(addr::COMMAND_POSITION, motion.target as u32);
        self.motion = None;
        set_moving(memory, false);
    }
}
