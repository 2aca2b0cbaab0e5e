//! Logging bootstrap shared by the drive service and the CLI
//!
//! Console output uses a compact `timestamp [LEVEL] message` format; an
//! optional daily-rolling file layer can be added for long-running hubs.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809000Z [INFO] Busy monitor started`
pub struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// File writer guards must outlive the subscriber
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default level when RUST_LOG is not set (trace/debug/info/warn/error)
    pub level: String,
    /// Write to stderr
    pub console: bool,
    /// Emit JSON lines instead of the bracketed format
    pub json: bool,
    /// Directory for daily-rolling log files; no file output when unset
    pub log_dir: Option<PathBuf>,
    /// File name prefix for rolled files
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            json: false,
            log_dir: None,
            file_prefix: "drivesrv".to_string(),
        }
    }
}

impl LogConfig {
    /// Parsed level, falling back to INFO for unknown names
    pub fn parsed_level(&self) -> Level {
        self.level.parse().unwrap_or(Level::INFO)
    }

    /// Filter directive used when RUST_LOG is absent
    fn default_directive(&self) -> String {
        let level = self.parsed_level().as_str().to_ascii_lowercase();
        format!("{level},serialport=warn")
    }
}

/// Initialize the global subscriber from a [`LogConfig`]
///
/// `RUST_LOG` overrides the configured level. Calling this twice is not an
/// error: the second call leaves the first subscriber in place.
pub fn init_with_config(config: &LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(env_str) if !env_str.trim().is_empty() => EnvFilter::new(env_str),
        _ => EnvFilter::new(config.default_directive()),
    };

    let console_layer = if config.console {
        let layer = if config.json {
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .event_format(BracketedLevelFormat)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.file_prefix));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
            match guards.lock() {
                Ok(mut slot) => slot.push(guard),
                Err(poisoned) => poisoned.into_inner().push(guard),
            }

            let layer = if config.json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_span_events(FmtSpan::CLOSE)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            "Logging initialized: level={}, json={}, dir={:?}",
            config.level,
            config.json,
            config.log_dir
        );
    }

    Ok(())
}

/// Console-only initialization at the given level
pub fn init(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = LogConfig {
        level: level.to_string(),
        ..Default::default()
    };
    init_with_config(&config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::WARN), "[WARN]");
        assert_eq!(format_level(&Level::TRACE), "[TRACE]");
    }

    #[test]
    fn test_parsed_level_fallback() {
        let config = LogConfig {
            level: "verbose".into(),
            ..Default::default()
        };
        assert_eq!(config.parsed_level(), Level::INFO);

        let config = LogConfig {
            level: "debug".into(),
            ..Default::default()
        };
        assert_eq!(config.parsed_level(), Level::DEBUG);
        assert_eq!(config.default_directive(), "debug,serialport=warn");
    }

    #[test]
    fn test_init_twice_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            level: "warn".into(),
            console: false,
            log_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        init_with_config(&config).unwrap();
        init_with_config(&config).unwrap();
    }
}
