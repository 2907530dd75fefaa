//! # Location Uplink
//!
//! Relay that reads location readings from stdin and delivers them in
//! batches to the configured HTTP endpoint.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use location_uplink::config::Config;
use location_uplink::logging::init_logging;
use location_uplink::{DeliveryEngine, EngineStatus, Reading};

/// Configuration file used when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Parser, Debug)]
#[command(name = "location-uplink", version, about = "Batch and deliver location readings over HTTP")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level, overrides RUST_LOG and the config file
    #[arg(long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,
}

/// Parse one input line. Blank lines are ignored.
fn parse_line(line: &str) -> serde_json::Result<Option<Reading>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

fn log_status(status: &EngineStatus) {
    match serde_json::to_string(status) {
        Ok(json) => info!(status = %json, "Engine status"),
        Err(e) => warn!(error = %e, "Could not encode engine status"),
    }
}

/// Main entry point for the relay
///
/// # Control Flow
///
/// 1. Load configuration and install logging
/// 2. Build the delivery engine and start its flush schedule
/// 3. Feed every stdin line into the engine, logging status periodically
/// 4. On EOF or Ctrl+C, stop the engine (final flush) and exit
///
/// # Examples
///
/// ```bash
/// echo '{"latitude":45.1,"longitude":9.2,"accuracy":5.0,"timestamp":"2025-06-29T10:30:00.000Z"}' \
///     | cargo run --release -- --config config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let _log_guard = init_logging(&config.logging, args.log_level.as_deref())?;

    info!("Location Uplink v{} starting...", env!("CARGO_PKG_VERSION"));

    let engine = DeliveryEngine::from_config(&config).context("failed to build delivery engine")?;
    engine.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status_interval = interval(Duration::from_secs(config.logging.status_interval_secs));
    status_interval.tick().await;

    info!("Reading location data from stdin, press Ctrl+C to exit");

    let mut accepted: u64 = 0;
    let mut rejected: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(reading)) => {
                        engine.add(reading);
                        accepted += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed reading");
                        rejected += 1;
                    }
                },
                Ok(None) => {
                    info!("Input closed, shutting down...");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read input, shutting down...");
                    break;
                }
            },

            _ = status_interval.tick() => log_status(&engine.status()),

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    let report = engine.stop().await;
    let status = engine.status();

    info!(
        accepted,
        rejected,
        delivered = report.delivered,
        left_buffered = status.buffer_size,
        "Location Uplink stopped"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = Args::try_parse_from(["location-uplink"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_log_level_is_checked() {
        let args = Args::try_parse_from(["location-uplink", "--log-level", "debug"]).unwrap();
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(Args::try_parse_from(["location-uplink", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_parse_valid_line() {
        let line = r#"{"latitude":45.1,"longitude":9.2,"accuracy":5.0,"timestamp":"2025-06-29T10:30:00.000Z","speed":3.5}"#;
        let reading = parse_line(line).unwrap().unwrap();
        assert_eq!(reading.latitude, 45.1);
        assert_eq!(reading.speed, Some(3.5));
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(parse_line("{not json").is_err());
        assert!(parse_line(r#"{"latitude":1.0}"#).is_err());
    }
}
