//! Command handlers
//!
//! Every handler runs against a hub built fresh from the configuration; the
//! busy monitor is only started when a command waits for a move to finish.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use colored::*;
use drivesrv::controller::StepperController;
use drivesrv::{Crk525, DriveConfig, DriveHub, MaintenanceCommand, PartitionChange, WriteOutcome};

use crate::Commands;

const WAIT_POLL: Duration = Duration::from_millis(10);

pub fn run(config: &DriveConfig, name: Option<&str>, command: Commands) -> Result<()> {
    let hub = DriveHub::from_config(config).context("building drive hub")?;

    match command {
        Commands::Types => {
            for type_name in hub.factory().list_available_type_names() {
                println!("{}", type_name.cyan());
            }
        },
        Commands::List => list(&hub, config),
        Commands::Config { json: true } => println!("{}", serde_json::to_string_pretty(config)?),
        Commands::Config { json: false } => print!("{}", config.to_yaml()?),
        Commands::Crc { frame } => print_crc(&frame)?,
        command => {
            let (name, controller) = select(&hub, name)?;
            run_on_controller(&hub, config, &name, &controller, command)?;
        },
    }
    Ok(())
}

fn run_on_controller(
    hub: &DriveHub,
    config: &DriveConfig,
    name: &str,
    controller: &Arc<dyn StepperController>,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Ping { value } => {
            controller.test_connection(value)?;
            println!("{} {} answered 0x{:04X}", "✓".green(), name, value);
        },
        Commands::Init => {
            let controller_config = config
                .controller(name)
                .ok_or_else(|| anyhow!("controller '{name}' is not configured"))?;
            let mut controller_config = controller_config.clone();
            controller_config.initialize = true;
            hub.apply_config(&controller_config)?;
            println!("{} {} initialized", "✓".green(), name);
            print_pending_resets(controller.as_ref());
        },
        Commands::Move {
            position,
            wait,
            timeout_ms,
        } => match controller.write_position(position)? {
            WriteOutcome::Accepted => {
                println!("{} {} moving to {}", "→".cyan(), name, position);
                if wait {
                    wait_for_stop(hub, controller.as_ref(), Duration::from_millis(timeout_ms))?;
                    println!("{} {} stopped", "✓".green(), name);
                }
            },
            WriteOutcome::Deferred => {
                println!("{} {} is still moving, write deferred", "!".yellow(), name);
            },
        },
        Commands::Speed { steps_per_second } => {
            controller.write_step_speed(steps_per_second)?;
            println!(
                "{} {} speed {} steps/s ({} us per step)",
                "✓".green(),
                name,
                steps_per_second,
                controller.core().step_period_us()
            );
        },
        Commands::Busy => {
            if controller.is_motor_busy()? {
                println!("{}", "moving".yellow());
            } else {
                println!("{}", "stopped".green());
            }
        },
        Commands::Energize { state } => {
            let energized = state == "on";
            controller.set_resting_energized(energized, true)?;
            println!("{} {} excitation {}", "✓".green(), name, state);
        },
        Commands::Energized { cached } => {
            let energized = controller.resting_energized(!cached)?;
            println!("{}", if energized { "on".green() } else { "off".normal() });
        },
        Commands::Read { address, count } => {
            controller.read_registers(address, count)?;
            print_registers(controller.as_ref(), address, count);
        },
        Commands::BaseAngle { angle: Some(angle) } => {
            let partition = controller.set_base_angle_option(angle)?;
            println!("{} base angle {}°, partition {}°", "✓".green(), angle, partition);
        },
        Commands::BaseAngle { angle: None } => {
            let options = controller.base_angle_options();
            let current = controller.current_base_angle();
            for angle in options {
                let marker = if Some(angle) == current { "*" } else { " " };
                let partitions = controller.base_angle_partition_options(angle)?;
                println!("{} {:>6}°  {:?}", marker.green(), angle, partitions);
            }
        },
        Commands::Partition { requested } => match controller.set_base_angle_partition(requested)? {
            PartitionChange::Changed(partition) => {
                println!("{} partition {}°", "✓".green(), partition);
                print_pending_resets(controller.as_ref());
            },
            PartitionChange::Unchanged(partition) => {
                println!("{} no option towards {}°, partition stays {}°", "!".yellow(), requested, partition);
            },
        },
        Commands::Maintenance { command } => {
            let command: MaintenanceCommand = command.parse()?;
            let crk = controller
                .as_any()
                .downcast_ref::<Crk525>()
                .ok_or_else(|| anyhow!("{} does not support maintenance commands", controller.type_name()))?;
            crk.maintenance(command)?;
            println!("{} {} executed", "✓".green(), command);
            print_pending_resets(controller.as_ref());
        },
        Commands::Resets { clear } => {
            if let Some(tag) = clear {
                controller.reset_dependency(&tag)?;
                println!("{} '{}' reported", "✓".green(), tag);
            }
            print_pending_resets(controller.as_ref());
        },
        Commands::Types | Commands::List | Commands::Config { .. } | Commands::Crc { .. } => {
            bail!("command does not target a controller")
        },
    }
    Ok(())
}

/// Pick the named controller, or the only one configured
fn select(hub: &DriveHub, name: Option<&str>) -> Result<(String, Arc<dyn StepperController>)> {
    let name = match name {
        Some(name) => name.to_string(),
        None => {
            let mut names = hub.controller_names();
            match names.len() {
                0 => bail!("no controllers configured"),
                1 => names.remove(0),
                _ => bail!("several controllers configured, pick one with --controller: {}", names.join(", ")),
            }
        },
    };
    let controller = hub.controller(&name)?;
    Ok((name, controller))
}

fn wait_for_stop(hub: &DriveHub, controller: &dyn StepperController, timeout: Duration) -> Result<()> {
    hub.start()?;
    let deadline = Instant::now() + timeout;
    while !controller.is_write_permitted() {
        if Instant::now() >= deadline {
            bail!("motor still moving after {} ms", timeout.as_millis());
        }
        thread::sleep(WAIT_POLL);
    }
    Ok(())
}

fn list(hub: &DriveHub, config: &DriveConfig) {
    println!("{}", hub.transport().describe().bold());
    for controller in &config.controllers {
        println!(
            "  {:<12} {:<8} address {:>3}",
            controller.name.cyan(),
            controller.type_name,
            controller.bus_address
        );
    }
}

fn print_registers(controller: &dyn StepperController, start: u16, count: u16) {
    let end = u32::from(start) + u32::from(count);
    let directory = controller.core().directory();
    for address in directory.addresses() {
        if u32::from(address) < u32::from(start) || u32::from(address) >= end {
            continue;
        }
        if let Ok(register) = directory.get(address) {
            println!(
                "0x{:04X}  {:<28} {}",
                address,
                register.name().dimmed(),
                register.value()
            );
        }
    }
}

fn print_pending_resets(controller: &dyn StepperController) {
    let pending = controller.pending_resets();
    if pending.is_empty() {
        return;
    }
    println!("{} pending: {}", "!".yellow(), pending.join(", "));
}

pub fn print_crc(frame: &str) -> Result<()> {
    let bytes = common::hex::decode(frame).map_err(|e| anyhow!("invalid frame: {e}"))?;
    let crc = stepdrive_link::crc16(&bytes);
    let mut sealed = bytes;
    sealed.extend_from_slice(&crc.to_le_bytes());
    println!("crc   0x{:04X}", crc);
    println!("frame {}", common::hex::encode_spaced(&sealed));
    Ok(())
}
