//! Structured logging setup shared by the binaries
//!
//! Level is taken from `RUST_LOG` (default `info`). An optional file receives
//! ERROR events only, mirroring the daemon's classic `/var/log/bnoflux.log`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber
pub fn init(format: LogFormat, error_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console = match format {
        LogFormat::Text => {
            fmt::layer().with_timer(UtcTime::rfc_3339()).with_target(false).boxed()
        }
        LogFormat::Json => {
            fmt::layer().json().with_timer(UtcTime::rfc_3339()).with_target(false).boxed()
        }
    };

    let error_log = match error_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_filter(LevelFilter::ERROR),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(filter).with(console).with(error_log).init();
    Ok(())
}
