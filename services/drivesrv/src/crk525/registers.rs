//! CRK525 register map
//!
//! Addresses are grouped in areas: operation (0x0012-0x0021), maintenance
//! (0x0040-0x004E), monitor (0x0100+), parameter (0x0200+) and system
//! (0x0300+). Double-word registers occupy two consecutive addresses.

use stepdrive_link::{Domain, Register};

pub const MONITOR_AREA: u16 = 0x0100;
pub const PARAMETER_AREA: u16 = 0x0200;
pub const SYSTEM_AREA: u16 = 0x0300;

// ============================================================================
// Addresses
// ============================================================================

pub mod addr {
    use super::{MONITOR_AREA, PARAMETER_AREA, SYSTEM_AREA};

    // Operation area
    pub const DWELL_TIME: u16 = 0x0012;
    pub const SEQUENTIAL_POSITIONING: u16 = 0x0013;
    pub const OPERATING_MODE: u16 = 0x0014;
    pub const POSITIONING_MODE: u16 = 0x0015;
    pub const DECELERATION: u16 = 0x0016;
    pub const ACCELERATION: u16 = 0x0018;
    pub const OPERATING_SPEED: u16 = 0x001A;
    pub const POSITION: u16 = 0x001C;
    pub const CMD1: u16 = 0x001E;
    pub const CMD2: u16 = 0x001F;
    pub const STATUS1: u16 = 0x0020;
    pub const STATUS2: u16 = 0x0021;

    // Maintenance area
    pub const RESET_ALARM: u16 = 0x0040;
    pub const CLEAR_ALARM_RECORDS: u16 = 0x0041;
    pub const CLEAR_WARNING_RECORDS: u16 = 0x0042;
    pub const BATCH_NV_READ: u16 = 0x0044;
    pub const BATCH_NV_WRITE: u16 = 0x0045;
    pub const ALL_DATA_INIT: u16 = 0x0046;
    pub const PRESET_POSITION: u16 = 0x0048;
    pub const CLEAR_COMM_ERROR_RECORDS: u16 = 0x0049;
    pub const PRESET_ENCODER: u16 = 0x004A;
    pub const CLEAR_COUNTER: u16 = 0x004B;
    pub const OPERATION_DATA_INIT: u16 = 0x004C;
    pub const APPLICATION_PARAM_INIT: u16 = 0x004D;
    pub const SYSTEM_PARAM_INIT: u16 = 0x004E;

    // Monitor area
    pub const PRESENT_ALARM: u16 = MONITOR_AREA;
    pub const ALARM_RECORDS: u16 = MONITOR_AREA | 0x01;
    pub const PRESENT_WARNING: u16 = MONITOR_AREA | 0x0B;
    pub const WARNING_RECORDS: u16 = MONITOR_AREA | 0x0C;
    pub const SELECTED_DATA_NUMBER: u16 = MONITOR_AREA | 0x16;
    pub const OPERATION_DATA_NUMBER: u16 = MONITOR_AREA | 0x17;
    pub const COMMAND_POSITION: u16 = MONITOR_AREA | 0x18;
    pub const COMMAND_SPEED: u16 = MONITOR_AREA | 0x1C;
    pub const ENCODER_COUNTER: u16 = MONITOR_AREA | 0x1E;
    pub const REMAINING_DWELL: u16 = MONITOR_AREA | 0x24;
    pub const IO_STATUS: u16 = MONITOR_AREA | 0x26;
    pub const COMM_ERROR: u16 = MONITOR_AREA | 0x28;
    pub const COMM_ERROR_RECORDS: u16 = MONITOR_AREA | 0x29;
    pub const DRIVER_STATUS: u16 = MONITOR_AREA | 0x33;

    // Parameter area
    pub const START_INPUT_MODE: u16 = PARAMETER_AREA;
    pub const IO_STOP_INPUT: u16 = PARAMETER_AREA | 0x01;
    pub const STOP_ACTION: u16 = PARAMETER_AREA | 0x02;
    pub const STOP_CONTACT: u16 = PARAMETER_AREA | 0x03;
    pub const C_ON_LOGIC: u16 = PARAMETER_AREA | 0x04;
    pub const OUT1_SIGNAL_MODE: u16 = PARAMETER_AREA | 0x06;
    pub const OUT2_SIGNAL_MODE: u16 = PARAMETER_AREA | 0x07;
    pub const OUT3_SIGNAL_MODE: u16 = PARAMETER_AREA | 0x08;
    pub const OUT4_SIGNAL_MODE: u16 = PARAMETER_AREA | 0x09;
    pub const HOME_P_PRESET_SWITCHING: u16 = PARAMETER_AREA | 0x0A;
    pub const EXCITATION_INPUT_MODE: u16 = PARAMETER_AREA | 0x0B;
    pub const HOME_FWD_RVS_INPUT_MODE: u16 = PARAMETER_AREA | 0x0C;
    pub const DATA_NUMBER_INPUT_MODE: u16 = PARAMETER_AREA | 0x0D;
    pub const AWO_CONTACT: u16 = PARAMETER_AREA | 0x0E;
    pub const HARDWARE_OVERTRAVEL: u16 = PARAMETER_AREA | 0x0F;
    pub const LS_CONTACT: u16 = PARAMETER_AREA | 0x10;
    pub const HOMES_CONTACT: u16 = PARAMETER_AREA | 0x11;
    pub const SLIT_CONTACT: u16 = PARAMETER_AREA | 0x12;
    pub const OVERTRAVEL_ACTION: u16 = PARAMETER_AREA | 0x13;
    pub const PRESET_POSITION_VALUE: u16 = PARAMETER_AREA | 0x14;
    pub const AREA1: u16 = PARAMETER_AREA | 0x16;
    pub const AREA2: u16 = PARAMETER_AREA | 0x18;
    pub const ENCODER_PRESET_VALUE: u16 = PARAMETER_AREA | 0x1C;
    pub const OPERATING_CURRENT: u16 = PARAMETER_AREA | 0x1E;
    pub const STANDSTILL_CURRENT: u16 = PARAMETER_AREA | 0x1F;
    pub const COMMON_ACCELERATION: u16 = PARAMETER_AREA | 0x24;
    pub const COMMON_DECELERATION: u16 = PARAMETER_AREA | 0x26;
    pub const START_SPEED: u16 = PARAMETER_AREA | 0x28;
    pub const JOG_SPEED: u16 = PARAMETER_AREA | 0x30;
    pub const JOG_ACCELERATION: u16 = PARAMETER_AREA | 0x32;
    pub const JOG_START_SPEED: u16 = PARAMETER_AREA | 0x34;
    pub const ACCELERATION_TYPE: u16 = PARAMETER_AREA | 0x36;
    pub const HOME_SEEK_MODE: u16 = PARAMETER_AREA | 0x37;
    pub const HOME_SEEK_SPEED: u16 = PARAMETER_AREA | 0x3A;
    pub const HOME_SEEK_ACCELERATION: u16 = PARAMETER_AREA | 0x3C;
    pub const HOME_SEEK_START_SPEED: u16 = PARAMETER_AREA | 0x3E;
    pub const HOME_SEEK_OFFSET: u16 = PARAMETER_AREA | 0x40;
    pub const HOME_SEEK_START_DIRECTION: u16 = PARAMETER_AREA | 0x42;
    pub const HOME_SEEK_SLIT_DETECTION: u16 = PARAMETER_AREA | 0x43;
    pub const HOME_SEEK_TIM_DETECTION: u16 = PARAMETER_AREA | 0x44;
    pub const TWO_SENSOR_BACK_STEPS: u16 = PARAMETER_AREA | 0x45;
    pub const STEP_OUT_BAND: u16 = PARAMETER_AREA | 0x46;
    pub const OVERVOLTAGE_WARNING: u16 = PARAMETER_AREA | 0x4A;
    pub const OVERHEAT_WARNING: u16 = PARAMETER_AREA | 0x4C;
    pub const SOFTWARE_OVERTRAVEL: u16 = PARAMETER_AREA | 0x52;
    pub const POSITIVE_SOFTWARE_LIMIT: u16 = PARAMETER_AREA | 0x54;
    pub const NEGATIVE_SOFTWARE_LIMIT: u16 = PARAMETER_AREA | 0x56;
    pub const DATA_SETTER_DISPLAY: u16 = PARAMETER_AREA | 0x58;
    pub const DATA_SETTER_EDIT: u16 = PARAMETER_AREA | 0x59;
    pub const COMM_TIMEOUT_ACTION: u16 = PARAMETER_AREA | 0x5B;
    pub const STEP_OUT_ACTION: u16 = PARAMETER_AREA | 0x5C;

    // System area
    pub const ROTATION_DIRECTION: u16 = SYSTEM_AREA | 0x0E;
    pub const STEP_OUT_DETECTION: u16 = SYSTEM_AREA | 0x10;
    pub const STEP_ANGLE: u16 = SYSTEM_AREA | 0x11;
    pub const ENCODER_GEAR_A: u16 = SYSTEM_AREA | 0x12;
    pub const ENCODER_GEAR_B: u16 = SYSTEM_AREA | 0x14;
    pub const AXIS_NUMBER: u16 = SYSTEM_AREA | 0x16;
    pub const COMM_PARITY: u16 = SYSTEM_AREA | 0x18;
    pub const COMM_STOP_BITS: u16 = SYSTEM_AREA | 0x19;
    pub const TRANSMISSION_WAIT: u16 = SYSTEM_AREA | 0x1A;
    pub const COMM_TIMEOUT: u16 = SYSTEM_AREA | 0x1B;
    pub const COMM_ERROR_ALARM: u16 = SYSTEM_AREA | 0x1C;
}

// ============================================================================
// Enumerated values
// ============================================================================

/// Input source selection (start, excitation, home/FWD/RVS, data number)
pub const INPUT_RS485: i64 = 0;
pub const INPUT_IO: i64 = 1;

pub const DISABLE: i64 = 0;
pub const ENABLE: i64 = 1;

pub const ROTATION_CCW: i64 = 0;
pub const ROTATION_CW: i64 = 1;

/// Maintenance registers run their action when written with this value
pub const EXECUTE: i64 = 1;

// ============================================================================
// Bit flags
// ============================================================================

pub mod cmd1 {
    pub const M0: u32 = 0x0001;
    pub const M1: u32 = 0x0002;
    pub const M2: u32 = 0x0004;
    pub const M3: u32 = 0x0008;
    pub const M4: u32 = 0x0010;
    pub const M5: u32 = 0x0020;
    /// Start positioning operation
    pub const START: u32 = 0x0100;
    pub const FWD: u32 = 0x0200;
    pub const RVS: u32 = 0x0400;
    pub const HOME: u32 = 0x0800;
    pub const STOP: u32 = 0x1000;
    /// Motor excitation
    pub const C_ON: u32 = 0x2000;

    pub const ALL: [u32; 12] = [M0, M1, M2, M3, M4, M5, START, FWD, RVS, HOME, STOP, C_ON];
}

pub mod cmd2 {
    pub const R_OUT1: u32 = 0x01;
    pub const R_OUT2: u32 = 0x02;
    pub const R_OUT3: u32 = 0x04;
    pub const R_OUT4: u32 = 0x08;

    pub const ALL: [u32; 4] = [R_OUT1, R_OUT2, R_OUT3, R_OUT4];
}

pub mod status1 {
    pub const M0_R: u32 = 0x0001;
    pub const M1_R: u32 = 0x0002;
    pub const M2_R: u32 = 0x0004;
    pub const M3_R: u32 = 0x0008;
    pub const M4_R: u32 = 0x0010;
    pub const M5_R: u32 = 0x0020;
    pub const WNG: u32 = 0x0040;
    pub const ALM: u32 = 0x0080;
    pub const START_R: u32 = 0x0100;
    pub const STEP_OUT: u32 = 0x0200;
    /// Motor is moving
    pub const MOVE: u32 = 0x0400;
    pub const HOME_P: u32 = 0x0800;
    pub const READY: u32 = 0x2000;
    pub const AREA: u32 = 0x8000;

    pub const ALL: [u32; 14] = [
        M0_R, M1_R, M2_R, M3_R, M4_R, M5_R, WNG, ALM, START_R, STEP_OUT, MOVE, HOME_P, READY,
        AREA,
    ];
}

pub mod status2 {
    /// Internal processing in progress
    pub const S_BSY: u32 = 0x01;
    pub const ENABLE: u32 = 0x02;
    pub const OH: u32 = 0x04;
    pub const TIM: u32 = 0x08;
    pub const ZSG: u32 = 0x10;

    pub const ALL: [u32; 5] = [S_BSY, ENABLE, OH, TIM, ZSG];
}

pub mod driver_status {
    pub const MOVE: u32 = 0x0000_0001;
    pub const HOME_P: u32 = 0x0000_0004;
    pub const READY: u32 = 0x0000_0008;
    pub const S_BUSY: u32 = 0x0000_0010;
    pub const AREA: u32 = 0x0000_0020;
    pub const ALM: u32 = 0x0000_0040;
    /// Motor is excited
    pub const ENABLE: u32 = 0x0000_0080;
    pub const WNG: u32 = 0x0000_0100;
    pub const STEP_OUT: u32 = 0x0000_0200;
    pub const LS_POS: u32 = 0x0000_0400;
    pub const LS_NEG: u32 = 0x0000_0800;
    pub const SLIT: u32 = 0x0000_1000;
    pub const HOMES: u32 = 0x0000_2000;
    pub const OH: u32 = 0x0000_4000;
    pub const START_R: u32 = 0x0000_8000;
    pub const M0_R: u32 = 0x0001_0000;
    pub const M1_R: u32 = 0x0002_0000;
    pub const M2_R: u32 = 0x0004_0000;
    pub const M3_R: u32 = 0x0008_0000;
    pub const M4_R: u32 = 0x0010_0000;
    pub const M5_R: u32 = 0x0020_0000;
    pub const TIM: u32 = 0x0040_0000;
    pub const ZSG: u32 = 0x0080_0000;
    /// Present alarm code in the top byte
    pub const ALARM_CODE: u32 = 0xFF00_0000;

    pub const ALL: [u32; 24] = [
        MOVE, HOME_P, READY, S_BUSY, AREA, ALM, ENABLE, WNG, STEP_OUT, LS_POS, LS_NEG, SLIT,
        HOMES, OH, START_R, M0_R, M1_R, M2_R, M3_R, M4_R, M5_R, TIM, ZSG, ALARM_CODE,
    ];

    pub fn alarm_code(status: u32) -> u8 {
        (status >> 24) as u8
    }
}

pub mod io_status {
    pub const M0: u32 = 0x0000_0001;
    pub const M1: u32 = 0x0000_0002;
    pub const M2: u32 = 0x0000_0004;
    pub const M3: u32 = 0x0000_0008;
    pub const M4: u32 = 0x0000_0010;
    pub const M5: u32 = 0x0000_0020;
    pub const START: u32 = 0x0000_0100;
    pub const ALM_RST: u32 = 0x0000_0200;
    pub const AWO: u32 = 0x0000_0400;
    pub const STOP: u32 = 0x0000_0800;
    pub const HOME_P_PRESET: u32 = 0x0000_1000;
    pub const FWD: u32 = 0x0000_2000;
    pub const RVS: u32 = 0x0000_4000;
    pub const LS_POS: u32 = 0x0001_0000;
    pub const LS_NEG: u32 = 0x0002_0000;
    pub const HOMES: u32 = 0x0004_0000;
    pub const SLIT: u32 = 0x0008_0000;
    pub const MOVE: u32 = 0x0100_0000;
    pub const ALM: u32 = 0x0200_0000;
    pub const OUT1: u32 = 0x0400_0000;
    pub const OUT2: u32 = 0x0800_0000;
    pub const OUT3: u32 = 0x1000_0000;
    pub const OUT4: u32 = 0x2000_0000;

    pub const ALL: [u32; 23] = [
        M0, M1, M2, M3, M4, M5, START, ALM_RST, AWO, STOP, HOME_P_PRESET, FWD, RVS, LS_POS,
        LS_NEG, HOMES, SLIT, MOVE, ALM, OUT1, OUT2, OUT3, OUT4,
    ];
}

// ============================================================================
// Base angle families
// ============================================================================

pub const BASE_ANGLE_036: f64 = 0.36;
pub const BASE_ANGLE_072: f64 = 0.72;

/// Step angles selected by raw values 0..=15 of the step angle register
/// when the motor's base angle is 0.36°
pub const PARTITIONS_036: [f64; 16] = [
    0.36, 0.18, 0.144, 0.09, 0.072, 0.045, 0.036, 0.018, 0.0144, 0.009, 0.0072, 0.0045, 0.0036,
    0.0028, 0.0018, 0.00144,
];

/// Same for a 0.72° base angle motor
pub const PARTITIONS_072: [f64; 16] = [
    0.72, 0.36, 0.288, 0.18, 0.144, 0.09, 0.072, 0.036, 0.0288, 0.018, 0.0144, 0.009, 0.0072,
    0.00576, 0.0036, 0.00288,
];

pub fn step_angle_036() -> Register {
    Register::word("step_angle_036", addr::STEP_ANGLE, Domain::linear(0, 15), 0)
}

pub fn step_angle_072() -> Register {
    Register::word("step_angle_072", addr::STEP_ANGLE, Domain::linear(0, 15), 0)
}

// ============================================================================
// Register table
// ============================================================================

const WORD_MAX: i64 = 0xFFFF;
const POSITION_MIN: i64 = -8_388_608;
const POSITION_MAX: i64 = 8_388_607;

fn execute(name: &'static str, address: u16) -> Register {
    Register::word(name, address, Domain::linear(0, EXECUTE), 0)
}

fn record(name: &'static str, address: u16) -> Register {
    Register::word(name, address, Domain::range(0, WORD_MAX), 0)
}

fn position(name: &'static str, address: u16, default: i64) -> Register {
    Register::double_word(name, address, Domain::range(POSITION_MIN, POSITION_MAX), default).signed()
}

fn rate(name: &'static str, address: u16, min: i64) -> Register {
    Register::double_word(name, address, Domain::range(min, 1_000_000), 0)
}

fn speed(name: &'static str, address: u16) -> Register {
    Register::double_word(name, address, Domain::range(1, 500_000), 0)
}

fn choice(name: &'static str, address: u16, max: i64, default: i64) -> Register {
    Register::word(name, address, Domain::linear(0, max), default)
}

const ALARM_RECORD_NAMES: [&str; 10] = [
    "alarm_record_1",
    "alarm_record_2",
    "alarm_record_3",
    "alarm_record_4",
    "alarm_record_5",
    "alarm_record_6",
    "alarm_record_7",
    "alarm_record_8",
    "alarm_record_9",
    "alarm_record_10",
];

const WARNING_RECORD_NAMES: [&str; 10] = [
    "warning_record_1",
    "warning_record_2",
    "warning_record_3",
    "warning_record_4",
    "warning_record_5",
    "warning_record_6",
    "warning_record_7",
    "warning_record_8",
    "warning_record_9",
    "warning_record_10",
];

const COMM_ERROR_RECORD_NAMES: [&str; 10] = [
    "comm_error_record_1",
    "comm_error_record_2",
    "comm_error_record_3",
    "comm_error_record_4",
    "comm_error_record_5",
    "comm_error_record_6",
    "comm_error_record_7",
    "comm_error_record_8",
    "comm_error_record_9",
    "comm_error_record_10",
];

/// Every CRK525 register except the step angle register, which belongs to
/// the base angle families
pub fn register_table() -> Vec<Register> {
    let mut table = vec![
        // Operation area
        Register::word("dwell_time", addr::DWELL_TIME, Domain::range(0, WORD_MAX), 0),
        choice("sequential_positioning", addr::SEQUENTIAL_POSITIONING, 1, DISABLE),
        choice("operating_mode", addr::OPERATING_MODE, 2, 0),
        choice("positioning_mode", addr::POSITIONING_MODE, 1, 0),
        rate("deceleration", addr::DECELERATION, 0),
        rate("acceleration", addr::ACCELERATION, 0),
        speed("operating_speed", addr::OPERATING_SPEED),
        position("position", addr::POSITION, 0),
        Register::word("cmd1", addr::CMD1, Domain::flags(&cmd1::ALL), 0),
        Register::word("cmd2", addr::CMD2, Domain::flags(&cmd2::ALL), 0),
        Register::word("status1", addr::STATUS1, Domain::flags(&status1::ALL), 0),
        Register::word("status2", addr::STATUS2, Domain::flags(&status2::ALL), 0),
        // Maintenance area
        execute("reset_alarm", addr::RESET_ALARM),
        execute("clear_alarm_records", addr::CLEAR_ALARM_RECORDS),
        execute("clear_warning_records", addr::CLEAR_WARNING_RECORDS),
        execute("batch_nv_read", addr::BATCH_NV_READ),
        execute("batch_nv_write", addr::BATCH_NV_WRITE),
        execute("all_data_init", addr::ALL_DATA_INIT),
        execute("preset_position", addr::PRESET_POSITION),
        execute("clear_comm_error_records", addr::CLEAR_COMM_ERROR_RECORDS),
        execute("preset_encoder", addr::PRESET_ENCODER),
        execute("clear_counter", addr::CLEAR_COUNTER),
        execute("operation_data_init", addr::OPERATION_DATA_INIT),
        execute("application_param_init", addr::APPLICATION_PARAM_INIT),
        execute("system_param_init", addr::SYSTEM_PARAM_INIT),
        // Monitor area
        record("present_alarm", addr::PRESENT_ALARM),
        record("present_warning", addr::PRESENT_WARNING),
        Register::word("selected_data_number", addr::SELECTED_DATA_NUMBER, Domain::range(0, 63), 0),
        Register::word("operation_data_number", addr::OPERATION_DATA_NUMBER, Domain::range(0, 63), 0),
        Register::double_word(
            "command_position",
            addr::COMMAND_POSITION,
            Domain::range(i64::from(i32::MIN), i64::from(i32::MAX)),
            0,
        )
        .signed(),
        Register::double_word("command_speed", addr::COMMAND_SPEED, Domain::range(-500_000, 500_000), 0)
            .signed(),
        Register::double_word(
            "encoder_counter",
            addr::ENCODER_COUNTER,
            Domain::range(i64::from(i32::MIN), i64::from(i32::MAX)),
            0,
        )
        .signed(),
        Register::word("remaining_dwell", addr::REMAINING_DWELL, Domain::range(0, 50_000), 0),
        Register::double_word("io_status", addr::IO_STATUS, Domain::flags(&io_status::ALL), 0),
        record("comm_error", addr::COMM_ERROR),
        Register::double_word(
            "driver_status",
            addr::DRIVER_STATUS,
            Domain::flags(&driver_status::ALL),
            0,
        ),
        // Parameter area
        choice("start_input_mode", addr::START_INPUT_MODE, 1, INPUT_IO),
        choice("io_stop_input", addr::IO_STOP_INPUT, 1, ENABLE),
        choice("stop_action", addr::STOP_ACTION, 3, 1),
        choice("stop_contact", addr::STOP_CONTACT, 1, 1),
        choice("c_on_logic", addr::C_ON_LOGIC, 1, 0),
        Register::word("out1_signal_mode", addr::OUT1_SIGNAL_MODE, Domain::linear(5, 16), 5),
        Register::word("out2_signal_mode", addr::OUT2_SIGNAL_MODE, Domain::linear(5, 16), 7),
        Register::word("out3_signal_mode", addr::OUT3_SIGNAL_MODE, Domain::linear(5, 16), 8),
        Register::word("out4_signal_mode", addr::OUT4_SIGNAL_MODE, Domain::linear(5, 16), 9),
        choice("home_p_preset_switching", addr::HOME_P_PRESET_SWITCHING, 1, 0),
        choice("excitation_input_mode", addr::EXCITATION_INPUT_MODE, 1, INPUT_IO),
        choice("home_fwd_rvs_input_mode", addr::HOME_FWD_RVS_INPUT_MODE, 1, INPUT_IO),
        choice("data_number_input_mode", addr::DATA_NUMBER_INPUT_MODE, 1, INPUT_IO),
        choice("awo_contact", addr::AWO_CONTACT, 1, 0),
        choice("hardware_overtravel", addr::HARDWARE_OVERTRAVEL, 1, ENABLE),
        choice("ls_contact", addr::LS_CONTACT, 1, 0),
        choice("homes_contact", addr::HOMES_CONTACT, 1, 0),
        choice("slit_contact", addr::SLIT_CONTACT, 1, 0),
        choice("overtravel_action", addr::OVERTRAVEL_ACTION, 1, 1),
        position("preset_position_value", addr::PRESET_POSITION_VALUE, 0x0080),
        position("area1", addr::AREA1, 0x0080),
        position("area2", addr::AREA2, 0x0080),
        position("encoder_preset_value", addr::ENCODER_PRESET_VALUE, 0x0080),
        Register::word("operating_current", addr::OPERATING_CURRENT, Domain::range(5, 100), 100),
        Register::word("standstill_current", addr::STANDSTILL_CURRENT, Domain::range(5, 50), 50),
        rate("common_acceleration", addr::COMMON_ACCELERATION, 1),
        rate("common_deceleration", addr::COMMON_DECELERATION, 1),
        speed("start_speed", addr::START_SPEED),
        speed("jog_speed", addr::JOG_SPEED),
        rate("jog_acceleration", addr::JOG_ACCELERATION, 1),
        speed("jog_start_speed", addr::JOG_START_SPEED),
        choice("acceleration_type", addr::ACCELERATION_TYPE, 1, 0),
        choice("home_seek_mode", addr::HOME_SEEK_MODE, 1, 1),
        speed("home_seek_speed", addr::HOME_SEEK_SPEED),
        rate("home_seek_acceleration", addr::HOME_SEEK_ACCELERATION, 1),
        speed("home_seek_start_speed", addr::HOME_SEEK_START_SPEED),
        position("home_seek_offset", addr::HOME_SEEK_OFFSET, 0x0080),
        choice("home_seek_start_direction", addr::HOME_SEEK_START_DIRECTION, 1, 1),
        choice("home_seek_slit_detection", addr::HOME_SEEK_SLIT_DETECTION, 1, DISABLE),
        choice("home_seek_tim_detection", addr::HOME_SEEK_TIM_DETECTION, 2, 0),
        Register::word("two_sensor_back_steps", addr::TWO_SENSOR_BACK_STEPS, Domain::range(0, 32_767), 200),
        Register::word("step_out_band", addr::STEP_OUT_BAND, Domain::range(1, 3600), 72),
        Register::word("overvoltage_warning", addr::OVERVOLTAGE_WARNING, Domain::range(250, 350), 310),
        Register::word("overheat_warning", addr::OVERHEAT_WARNING, Domain::range(40, 85), 85),
        choice("software_overtravel", addr::SOFTWARE_OVERTRAVEL, 1, ENABLE),
        position("positive_software_limit", addr::POSITIVE_SOFTWARE_LIMIT, 0x0100),
        position("negative_software_limit", addr::NEGATIVE_SOFTWARE_LIMIT, 0),
        choice("data_setter_display", addr::DATA_SETTER_DISPLAY, 1, 0),
        choice("data_setter_edit", addr::DATA_SETTER_EDIT, 1, ENABLE),
        choice("comm_timeout_action", addr::COMM_TIMEOUT_ACTION, 1, 1),
        choice("step_out_action", addr::STEP_OUT_ACTION, 2, 0),
        // System area
        choice("rotation_direction", addr::ROTATION_DIRECTION, 1, ROTATION_CW),
        choice("step_out_detection", addr::STEP_OUT_DETECTION, 1, DISABLE),
        Register::double_word("encoder_gear_a", addr::ENCODER_GEAR_A, Domain::range(1, 250_000), 0),
        Register::double_word("encoder_gear_b", addr::ENCODER_GEAR_B, Domain::range(1, 250_000), 0),
        Register::word("axis_number", addr::AXIS_NUMBER, Domain::range(0, 31), 15),
        choice("comm_parity", addr::COMM_PARITY, 2, 1),
        choice("comm_stop_bits", addr::COMM_STOP_BITS, 1, 0),
        Register::word("transmission_wait", addr::TRANSMISSION_WAIT, Domain::range(1, 10_000), 10),
        Register::word("comm_timeout", addr::COMM_TIMEOUT, Domain::range(0, 30_000), 0),
        Register::word("comm_error_alarm", addr::COMM_ERROR_ALARM, Domain::range(1, 10), 3),
    ];

    table.extend(
        (addr::ALARM_RECORDS..)
            .zip(ALARM_RECORD_NAMES)
            .map(|(address, name)| record(name, address)),
    );
    table.extend(
        (addr::WARNING_RECORDS..)
            .zip(WARNING_RECORD_NAMES)
            .map(|(address, name)| record(name, address)),
    );
    table.extend(
        (addr::COMM_ERROR_RECORDS..)
            .zip(COMM_ERROR_RECORD_NAMES)
            .map(|(address, name)| record(name, address)),
    );
    table
}

/// Whether a write to `address` only takes effect after a power cycle
pub fn is_system_area(address: u16) -> bool {
    address & 0xFF00 == SYSTEM_AREA
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use stepdrive_link::{RegisterDirectory, Width};

    #[test]
    fn test_table_has_no_overlaps() {
        let table = register_table();
        let dir = RegisterDirectory::from_registers(table.clone()).unwrap();
        assert_eq!(dir.len(), table.len());

        // No double word may cover the address of another register
        for register in &table {
            if register.width() == Width::DoubleWord {
                assert!(!dir.contains(register.address() + 1), "{}", register.name());
            }
        }
        assert!(!dir.contains(addr::STEP_ANGLE));
    }

    #[test]
    fn test_records_are_contiguous() {
        let dir = RegisterDirectory::from_registers(register_table()).unwrap();
        assert_eq!(dir.get(0x0101).unwrap().name(), "alarm_record_1");
        assert_eq!(dir.get(0x010A).unwrap().name(), "alarm_record_10");
        assert_eq!(dir.get(0x0115).unwrap().name(), "warning_record_10");
        assert_eq!(dir.get(0x0132).unwrap().name(), "comm_error_record_10");
    }

    #[test]
    fn test_flag_domains() {
        let dir = RegisterDirectory::from_registers(register_table()).unwrap();
        let cmd = dir.get(addr::CMD1).unwrap();
        assert!(cmd.accepts(i64::from(cmd1::START | cmd1::M0 | cmd1::C_ON)));
        assert!(!cmd.accepts(0x4000));

        let status = dir.get(addr::DRIVER_STATUS).unwrap();
        assert!(status.accepts(i64::from(0x2A00_0000 | driver_status::ENABLE)));
        assert_eq!(driver_status::alarm_code(0x2A00_0080), 0x2A);
    }

    #[test]
    fn test_partition_tables() {
        assert_eq!(PARTITIONS_036[0], BASE_ANGLE_036);
        assert_eq!(PARTITIONS_072[0], BASE_ANGLE_072);
        assert!(PARTITIONS_036.windows(2).all(|w| w[0] > w[1]));
        assert!(PARTITIONS_072.windows(2).all(|w| w[0] > w[1]));
        assert!(is_system_area(addr::STEP_ANGLE));
        assert!(!is_system_area(addr::START_INPUT_MODE));
    }
}
