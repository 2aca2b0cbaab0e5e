//! Configuration layering: defaults, YAML file, environment

// Allow unwrap() in tests for cleaner test code
#![allow(clippy::disallowed_methods)]

use std::io::Write;

use drivesrv::config::{DriveConfig, TransportKind};
use drivesrv::controller::StepperController;
use drivesrv::DriveHub;
use errors::DriveError;

const YAML: &str = r#"
transport:
  kind: simulated
  baud_rate: 19200
  busy_polls: 1
monitor:
  tick_ms: 5
logging:
  level: debug
controllers:
  - name: focus
    type_name: crk525
    bus_address: 1
    step_speed: 2000
    base_angle: 0.72
  - name: zoom
    type_name: CRK525
    bus_address: 2
    monitor_threshold: 40
    initialize: false
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// Only test in this binary touching the process environment
#[test]
fn test_file_then_environment() {
    let file = write_config(YAML);
    std::env::set_var("STEPDRIVE_MONITOR__TICK_MS", "7");
    let config = DriveConfig::load(Some(file.path()));
    std::env::remove_var("STEPDRIVE_MONITOR__TICK_MS");
    let config = config.unwrap();

    assert_eq!(config.transport.kind, TransportKind::Simulated);
    assert_eq!(config.transport.serial.baud_rate, 19200);
    assert_eq!(config.transport.serial.timeout_ms, 5000);
    assert_eq!(config.transport.busy_polls, 1);
    assert_eq!(config.monitor.tick_ms, 7);
    assert_eq!(config.logging.level, "debug");

    let zoom = config.controller("zoom").unwrap();
    assert_eq!(zoom.monitor_threshold, 40);
    assert!(!zoom.initialize);
    assert!(config.controller("focus").unwrap().initialize);
}

#[test]
fn test_invalid_file_is_rejected() {
    let file = write_config(
        r#"
controllers:
  - name: focus
    type_name: crk525
    bus_address: 1
  - name: zoom
    type_name: crk525
    bus_address: 1
"#,
    );
    let err = DriveConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, DriveError::Configuration(msg) if msg.contains("already in use")));

    let file = write_config("controllers: 12\n");
    assert!(matches!(
        DriveConfig::load(Some(file.path())),
        Err(DriveError::Configuration(_))
    ));
}

#[test]
fn test_loaded_config_drives_the_hub() {
    let file = write_config(YAML);
    let figment = DriveConfig::figment(Some(file.path()));
    let config = DriveConfig::from_figment(figment).unwrap();

    let hub = DriveHub::from_config(&config).unwrap();
    hub.apply_all(&config).unwrap();

    let focus = hub.controller("focus").unwrap();
    assert!(focus.core().is_initialized());
    assert_eq!(focus.core().step_period_us(), 500);
    assert_eq!(focus.current_base_angle(), Some(0.72));

    let zoom = hub.controller("zoom").unwrap();
    assert!(!zoom.core().is_initialized());
    assert_eq!(zoom.core().monitor_threshold(), 40);
}
