//! bnoflux - BNO055 to InfluxDB/MQTT acquisition daemon
//!
//! Module structure:
//! - `domain/` - Sensor vectors, field groups and measurement batches
//! - `io/` - BNO055 driver, line protocol, UDP and MQTT sinks
//! - `services/` - Acquisition loop, dispatcher, calibration
//! - `infra/` - Config, errors, logging, metrics

use bnoflux::infra::error::EXIT_INIT_FAILURE;
use bnoflux::infra::logging::{self, LogFormat};
use bnoflux::infra::{AppError, Config, Metrics};
use bnoflux::io::{influx_udp, Bno055, InfluxUdpSink, MqttSink, Sink};
use bnoflux::services::{AcquisitionLoop, Dispatcher, Timing};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Poll a BNO055 IMU and ship readings to InfluxDB and MQTT
#[derive(Parser, Debug)]
#[command(name = "bnoflux", version, about)]
struct Args {
    /// JSON or TOML configuration file. Overrides the discrete flags.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// I2C bus number (/dev/i2c-N)
    #[arg(long, default_value_t = 0)]
    i2c_bus: u8,

    /// Seconds between samples
    #[arg(long, default_value_t = 0.1)]
    update_rate: f64,

    /// InfluxDB UDP listener port
    #[arg(long, default_value_t = 8089)]
    udp_port: u16,

    #[arg(long, default_value = "localhost")]
    db_host: String,

    /// InfluxDB HTTP port, used for the startup ping
    #[arg(long, default_value_t = 8086)]
    db_port: u16,

    /// Additional file receiving ERROR events
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logging::init(args.log_format, args.log_file.as_deref()) {
        eprintln!("failed to open log file: {}", e);
        return ExitCode::from(EXIT_INIT_FAILURE);
    }

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "bnoflux_starting");

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "startup_failed");
            ExitCode::from(e.exit_code())
        }
    }
}

fn load_config(args: &Args) -> Result<Config, AppError> {
    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => {
            let config = Config::from_flags(
                args.i2c_bus,
                args.update_rate,
                args.udp_port,
                &args.db_host,
                args.db_port,
            );
            config.validate()?;
            config
        }
    };
    Ok(config)
}

async fn run(args: Args) -> Result<u8, AppError> {
    // Before any startup step; the loop honours a flag raised earlier
    let shutdown_rx = spawn_shutdown_listener();
    let config = load_config(&args)?;

    info!(
        config_file = %config.config_file(),
        device_id = %config.device_id(),
        i2c_device = %config.i2c_device(),
        imu_address = %format!("0x{:02X}", config.imu_address()),
        updaterate = %config.updaterate(),
        layout = ?config.orientation(),
        influx = %format!("{}:{}", config.influx_host(), config.influx_port()),
        udp_port = %config.udp_port(),
        broker = ?config.mqtt().map(|m| format!("{}:{}", m.broker, m.port)),
        topics = ?config.topics(),
        "config_loaded"
    );

    if config.influx_ping() {
        match influx_udp::ping(
            config.influx_host(),
            config.influx_port(),
            config.influx_ping_timeout(),
        )
        .await
        {
            Ok(true) => info!("influx_reachable"),
            Ok(false) => warn!("influx_ping_unhealthy"),
            Err(e) => return Err(AppError::Connectivity { url: e.url, message: e.message }),
        }
    }

    let sensor =
        Bno055::open(&config.i2c_device(), config.imu_address()).map_err(AppError::SensorInit)?;

    let database = InfluxUdpSink::bind(config.influx_host(), config.udp_port())
        .await
        .map_err(|e| AppError::SinkSetup { sink: "database", message: e.to_string() })?;
    let broker = config.mqtt().map(|mqtt| {
        Box::new(MqttSink::connect(mqtt, config.device_id(), config.topics())) as Box<dyn Sink>
    });

    let metrics = Arc::new(Metrics::new());
    let dispatcher =
        Dispatcher::new(Box::new(database), broker, config.dispatch_timeout(), metrics.clone());

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_interval = config.metrics_interval_secs();
    if metrics_interval > 0 {
        let metrics_clone = metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics_clone.report().log();
            }
        });
    }

    let acquisition = AcquisitionLoop::new(
        sensor,
        dispatcher,
        config.orientation(),
        config.tags().clone(),
        Timing::from_config(&config),
        metrics.clone(),
    );
    let report = acquisition.run(shutdown_rx).await;

    metrics.report().log();
    match &report.result {
        Ok(()) => info!(cycles = %report.cycles, "bnoflux_stopped"),
        Err(e) => {
            error!(error = %e, cycles = %report.cycles, state = ?report.state, "bnoflux_failed")
        }
    }
    Ok(report.exit_code())
}

/// Raise the shutdown flag on Ctrl+C or SIGTERM
fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });
    shutdown_rx
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "sigterm_handler_unavailable");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}
