//! # Logging
//!
//! Installs the global `tracing` subscriber: a compact stderr layer plus an
//! optional daily-rolling file layer.
//!
//! Level precedence: `--log-level` flag, then `RUST_LOG`, then the
//! `[logging] level` setting.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Result, UplinkError};

/// Prefix of the rolled log files
pub const LOG_FILE_PREFIX: &str = "location-uplink";

/// Pick the filter for this process
pub fn build_filter(config: &LoggingConfig, level_override: Option<&str>) -> EnvFilter {
    match level_override {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level)),
    }
}

/// Daily-rolling appender under `directory`, creating it if needed
///
/// # Errors
///
/// Returns `UplinkError::Io` if the directory cannot be created and
/// `UplinkError::Logging` if the first log file cannot be opened
pub fn file_appender(directory: &Path) -> Result<RollingFileAppender> {
    std::fs::create_dir_all(directory)?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(directory)
        .map_err(|e| UplinkError::Logging(e.to_string()))
}

/// Install the global subscriber.
///
/// The returned guard must be kept alive for as long as file logging is
/// wanted; dropping it flushes and stops the background writer.
///
/// # Errors
///
/// Fails if the log directory is unusable or a global subscriber is
/// already installed
pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config, level_override);

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let appender = file_appender(Path::new(directory))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_target(true).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = fmt::layer().compact().with_target(true).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| UplinkError::Logging(e.to_string()))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn logging(level: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_override_wins() {
        let filter = build_filter(&logging("warn"), Some("debug"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_file_appender_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("logs").join("uplink");

        let mut appender = file_appender(&dir).unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let files: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with(LOG_FILE_PREFIX));
        assert!(files[0].ends_with(".log"));
    }
}
