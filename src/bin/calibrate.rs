//! BNO055 calibration utility
//!
//! Brings the sensor up, prints the calibration levels until every
//! subsystem reaches 3, then reads the profile and writes it back.
//!
//! Usage:
//!   bnoflux-calibrate --i2c-bus 1
//!   bnoflux-calibrate --i2c-bus 1 --output calibration.json
//!   bnoflux-calibrate --i2c-bus 1 --restore calibration.json

use anyhow::{Context, Result};
use bnoflux::infra::logging::{self, LogFormat};
use bnoflux::io::bno055::{ALTERNATE_ADDRESS, DEFAULT_ADDRESS};
use bnoflux::io::Bno055;
use bnoflux::services::calibration::{
    calibrate, load_profile, restore, save_profile, CalibrationOutcome, CalibrationTiming,
};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "bnoflux-calibrate", version, about = "Calibration utility for the BNO055")]
struct Args {
    /// I2C bus number, e.g. 0 for /dev/i2c-0
    #[arg(long, default_value_t = 0)]
    i2c_bus: u8,

    /// 7-bit sensor address (0x28 or 0x29)
    #[arg(long, default_value_t = DEFAULT_ADDRESS, value_parser = parse_address)]
    address: u8,

    /// Save the calibration profile as JSON
    #[arg(long, conflicts_with = "restore")]
    output: Option<PathBuf>,

    /// Write a saved profile to the sensor instead of calibrating
    #[arg(long)]
    restore: Option<PathBuf>,
}

fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LogFormat::Text, None)?;
    let args = Args::parse();

    if args.address != DEFAULT_ADDRESS && args.address != ALTERNATE_ADDRESS {
        println!("Warning: 0x{:02X} is not a BNO055 address", args.address);
    }

    let path = format!("/dev/i2c-{}", args.i2c_bus);
    let sensor = Bno055::open(&path, args.address).context("Sensor Initialization Failed")?;

    if let Some(profile_path) = &args.restore {
        let profile = load_profile(profile_path)
            .with_context(|| format!("reading {}", profile_path.display()))?;
        restore(sensor, profile).await.context("writing calibration")?;
        println!("Calibration restored from {}", profile_path.display());
        return Ok(());
    }

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = shutdown_tx.send(true);
    });

    println!("Begin Calibration");
    let (_, outcome) =
        calibrate(sensor, CalibrationTiming::default(), &mut shutdown_rx, |status| {
            println!("  {}", status);
        })
        .await
        .context("Sensor Initialization Failed")?;

    match outcome {
        CalibrationOutcome::Interrupted => {
            println!("Exiting Script");
        }
        CalibrationOutcome::Calibrated(profile) => {
            println!("Sensor Calibrated");
            println!("New Calibration Values: {:?}", profile.0);
            println!("Sensor Fully Calibrated and Values set.");
            if let Some(output) = &args.output {
                save_profile(output, &profile)
                    .with_context(|| format!("writing {}", output.display()))?;
                println!("Saved to {}", output.display());
            }
        }
    }
    Ok(())
}
