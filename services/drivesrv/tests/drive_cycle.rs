//! Drive hub tests against simulated CRK525 drives
//!
//! Each test builds a hub from an in-code configuration with a simulated
//! transport, so every controller operation travels through real frames.
//! The monitor thread is not started; tests advance it with `tick_once`.

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use std::sync::Arc;

use drivesrv::config::{ControllerConfig, DriveConfig, TransportKind};
use drivesrv::controller::StepperController;
use drivesrv::crk525::registers::addr;
use drivesrv::crk525::{self, Crk525, MaintenanceCommand};
use drivesrv::{ControllerConstructor, DriveHub, PartitionChange, WriteOutcome};
use errors::DriveError;

fn controller_config(name: &str, bus_address: u8) -> ControllerConfig {
    ControllerConfig {
        name: name.to_string(),
        type_name: "crk525".to_string(),
        bus_address,
        monitor_threshold: 0,
        step_speed: None,
        base_angle: None,
        initialize: true,
    }
}

fn simulated_config(busy_polls: u32, controllers: Vec<ControllerConfig>) -> DriveConfig {
    let mut config = DriveConfig::default();
    config.transport.kind = TransportKind::Simulated;
    config.transport.busy_polls = busy_polls;
    config.controllers = controllers;
    config
}

fn ready_hub(busy_polls: u32) -> (DriveHub, Arc<dyn StepperController>) {
    let config = simulated_config(busy_polls, vec![controller_config("focus", 1)]);
    let hub = DriveHub::from_config(&config).unwrap();
    hub.apply_all(&config).unwrap();
    let focus = hub.controller("focus").unwrap();
    (hub, focus)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_configured_controllers_are_created_without_traffic() {
    let config = simulated_config(
        2,
        vec![controller_config("focus", 1), controller_config("zoom", 2)],
    );
    let hub = DriveHub::from_config(&config).unwrap();
    assert_eq!(hub.controller_names(), vec!["focus", "zoom"]);
    assert!(!hub.controller("focus").unwrap().core().is_initialized());
    assert!(matches!(hub.controller("iris"), Err(DriveError::Unconfigured(_))));
    assert!(hub.transport().describe().contains("simulated"));
}

#[test]
fn test_initialization_runs_once() {
    let (_hub, focus) = ready_hub(2);
    assert!(focus.core().is_initialized());
    assert_eq!(focus.register_value(addr::START_INPUT_MODE).unwrap(), 0);
    assert!(matches!(
        focus.initialize_physical_controller(),
        Err(DriveError::AlreadyInitialized(_))
    ));
}

#[test]
fn test_move_cycle_releases_write_permission() {
    let (hub, focus) = ready_hub(2);

    assert_eq!(focus.write_position(400).unwrap(), WriteOutcome::Accepted);
    assert_eq!(focus.write_position(800).unwrap(), WriteOutcome::Deferred);
    let crk = focus.as_any().downcast_ref::<Crk525>().unwrap();
    assert!(crk.is_internal_processing());
    assert_eq!(hub.monitor().list_size(), 1);

    for _ in 0..3 {
        hub.monitor().tick_once();
    }
    assert_eq!(hub.monitor().list_size(), 0);
    assert!(focus.is_write_permitted());
    assert!(!crk.is_internal_processing());
    assert_eq!(focus.core().read_register(addr::COMMAND_POSITION).unwrap(), 400);

    // Incremental moves accumulate on the drive
    assert!(focus.write_position(-100).unwrap().is_accepted());
    for _ in 0..3 {
        hub.monitor().tick_once();
    }
    assert_eq!(focus.core().read_register(addr::COMMAND_POSITION).unwrap(), 300);
    assert_eq!(hub.monitor_status().released, 2);
}

#[test]
fn test_move_without_monitor_is_unconfigured() {
    let transport = Arc::new(stepdrive_link::SimulatedBus::new());
    let crk = Crk525::create(42, transport).unwrap();
    crk.core().set_bus_address(9).unwrap();
    assert!(matches!(crk.write_position(10), Err(DriveError::Unconfigured(_))));
    assert!(crk.is_write_permitted());
}

#[test]
fn test_removed_controller_leaves_monitor() {
    let (hub, focus) = ready_hub(5);
    focus.write_position(10).unwrap();
    assert!(hub.monitor().contains(focus.id()));

    hub.remove_controller("focus").unwrap();
    assert!(!hub.monitor().contains(focus.id()));
    assert!(hub.controller_names().is_empty());
}

// ============================================================================
// Step speed
// ============================================================================

#[test]
fn test_step_speed_bounds() {
    let (_hub, focus) = ready_hub(2);
    assert!(matches!(
        focus.write_step_speed(0),
        Err(DriveError::InvalidParameter { .. })
    ));
    assert!(focus.write_step_speed(1_000_001).is_err());

    focus.write_step_speed(2_000).unwrap();
    assert_eq!(focus.core().step_period_us(), 500);
    assert_eq!(focus.register_value(addr::OPERATING_SPEED).unwrap(), 2_000);

    focus.write_step_speed(500_000).unwrap();
    assert_eq!(focus.core().step_period_us(), 2);

    // Within the generic bound but above the drive's speed register range
    assert!(matches!(
        focus.write_step_speed(1_000_000),
        Err(DriveError::OutOfRange { .. })
    ));
    assert_eq!(focus.core().step_period_us(), 2);
}

// ============================================================================
// Base angle
// ============================================================================

#[test]
fn test_base_angle_swap_rereads_partition() {
    let (_hub, focus) = ready_hub(2);
    assert_eq!(focus.base_angle_options(), vec![0.36, 0.72]);
    assert_eq!(focus.set_base_angle_option(0.72).unwrap(), 0.72);
    assert_eq!(focus.current_base_angle(), Some(0.72));
    assert_eq!(focus.base_angle_partition_options(0.72).unwrap()[1], 0.36);
    assert!(matches!(
        focus.set_base_angle_option(1.8),
        Err(DriveError::InvalidBaseAngle(_))
    ));
}

#[test]
fn test_partition_snaps_towards_request() {
    let (_hub, focus) = ready_hub(2);
    assert_eq!(focus.read_base_angle_partition().unwrap(), 0.36);

    assert_eq!(
        focus.set_base_angle_partition(0.1).unwrap(),
        PartitionChange::Changed(0.09)
    );
    assert_eq!(focus.core().read_register(addr::STEP_ANGLE).unwrap(), 3);

    assert_eq!(
        focus.set_base_angle_partition(1.0).unwrap(),
        PartitionChange::Changed(0.36)
    );
    // Nothing coarser than the base angle
    assert_eq!(
        focus.set_base_angle_partition(1.0).unwrap(),
        PartitionChange::Unchanged(0.36)
    );
    assert_eq!(focus.current_base_angle_partition(), Some(0.36));
}

// ============================================================================
// Reset dependencies
// ============================================================================

#[test]
fn test_initialization_leaves_power_cycle_pending() {
    let (_hub, focus) = ready_hub(2);
    assert_eq!(focus.pending_resets(), vec![crk525::POWER_CYCLE]);
    focus.reset_dependency(crk525::POWER_CYCLE).unwrap();
    assert!(focus.pending_resets().is_empty());
    assert!(matches!(
        focus.reset_dependency("cold-boot"),
        Err(DriveError::UnknownResetDependency(_))
    ));
}

#[test]
fn test_power_cycle_overrides_data_initialisation() {
    let (_hub, focus) = ready_hub(2);
    let crk = focus.as_any().downcast_ref::<Crk525>().unwrap();
    crk.maintenance(MaintenanceCommand::AllDataInit).unwrap();
    assert_eq!(
        focus.pending_resets(),
        vec![crk525::ALL_DATA_INIT, crk525::POWER_CYCLE]
    );

    focus.reset_dependency(crk525::ALL_DATA_INIT).unwrap();
    assert!(crk.system_reload_lock().is_locked());

    crk.maintenance(MaintenanceCommand::AllDataInit).unwrap();
    focus.reset_dependency(crk525::POWER_CYCLE).unwrap();
    assert!(focus.pending_resets().is_empty());
    assert!(!crk.system_reload_lock().is_locked());
}

// ============================================================================
// Factory
// ============================================================================

#[test]
fn test_factory_names() {
    let (hub, _focus) = ready_hub(2);
    let err = hub
        .factory()
        .register("crk525", Arc::new(Crk525::create) as ControllerConstructor)
        .unwrap_err();
    assert!(matches!(err, DriveError::DuplicateControllerType(_)));

    let err = hub.add_controller("iris", "PKP-245", 4).unwrap_err();
    assert!(matches!(err, DriveError::UnknownControllerType(name) if name == "PKP-245"));

    assert!(hub.add_controller("focus", "CRK525", 5).is_err());
}
