//! stepctl - command-line control of stepper drives
//!
//! Loads the drive configuration (YAML + `STEPDRIVE_` environment), builds a
//! drive hub and runs one operation against a configured controller.

mod drive;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use drivesrv::DriveConfig;
use tracing::debug;

#[derive(Parser)]
#[command(name = "stepctl")]
#[command(about = "Control stepper drives on an RS-485 bus")]
#[command(long_about = "Control stepper drives on an RS-485 bus

Examples:
  stepctl -c drives.yaml init                   # Initialise the only drive
  stepctl -c drives.yaml --controller focus move 400 --wait
  stepctl -c drives.yaml partition 0.09         # Finer step resolution
  stepctl crc \"01 03 00 00 00 0A\"               # Frame checksum")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short = 'c', long, global = true, env = "STEPDRIVE_CONFIG")]
    config: Option<PathBuf>,

    /// Controller name (may be omitted when only one is configured)
    #[arg(short = 'n', long, global = true)]
    controller: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered controller types
    Types,

    /// List configured controllers
    List,

    /// Diagnostic round trip
    Ping {
        #[arg(long, default_value_t = stepdrive_link::DEFAULT_TEST_VALUE)]
        value: u16,
    },

    /// Initialise the drive and apply its configured speed and base angle
    Init,

    /// Send a target position and start the move
    Move {
        #[arg(allow_negative_numbers = true)]
        position: i64,
        /// Wait until the motor stops
        #[arg(short, long)]
        wait: bool,
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Set the operating speed in steps per second
    Speed { steps_per_second: u32 },

    /// Report whether the motor is moving
    Busy,

    /// Energise or release the motor at rest
    Energize {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },

    /// Report the excitation state
    Energized {
        /// Report the cached flag instead of reading the drive
        #[arg(long)]
        cached: bool,
    },

    /// Read registers and print the directory values
    Read {
        /// Start address (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_address)]
        address: u16,
        #[arg(long, default_value = "1")]
        count: u16,
    },

    /// Show or select the motor's base angle
    BaseAngle { angle: Option<f64> },

    /// Move the step angle partition towards a requested value
    Partition { requested: f64 },

    /// Run a drive maintenance action (e.g. reset-alarm, all-data-init)
    Maintenance { command: String },

    /// Show pending reset dependencies, or report one as performed
    Resets {
        #[arg(long)]
        clear: Option<String>,
    },

    /// Print the CRC of a hex frame
    Crc { frame: String },

    /// Print the effective configuration
    Config {
        #[arg(long)]
        json: bool,
    },
}

fn parse_address(text: &str) -> Result<u16, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid register address '{text}': {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Offline commands need neither configuration nor a bus
    if let Commands::Crc { frame } = &cli.command {
        common::logging::init(if cli.verbose { "debug" } else { "warn" })
            .map_err(|e| anyhow!("failed to initialise logging: {e}"))?;
        return drive::print_crc(frame);
    }

    let mut config = DriveConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("loading {}", path.display()),
        None => "loading configuration from the environment".to_string(),
    })?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    common::logging::init_with_config(&config.logging)
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))?;
    debug!("Configuration loaded: {} controller(s)", config.controllers.len());

    if let Err(e) = drive::run(&config, cli.controller.as_deref(), cli.command) {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
