//! Configuration loading from JSON or TOML files
//!
//! The file format is picked by extension: `.json` is parsed as JSON (the
//! legacy `conf.json` layout), anything else as TOML. Keys keep their
//! legacy spelling (`deviceID`, `i2cPort`, `updaterate`); snake_case aliases
//! are accepted.
//!
//! Without a file, the daemon runs from discrete CLI flags via
//! [`Config::from_flags`] with broker forwarding disabled.

use crate::domain::measurement::{default_tags, field_group_count};
use crate::domain::types::OrientationLayout;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration failures. All of them stop the daemon before sampling starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("imu.topics has {actual} entries but each batch carries {expected} field groups")]
    TopicCountMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImuConfig {
    #[serde(rename = "i2cPort", alias = "i2c_port")]
    pub i2c_port: u8,
    #[serde(alias = "update_rate")]
    pub updaterate: f64,
    pub udp_port: u16,
    #[serde(default)]
    pub topics: Vec<String>,
    /// 7-bit I2C address (0x28, or 0x29 with ADR pulled high)
    #[serde(default = "default_imu_address")]
    pub address: u8,
    #[serde(default)]
    pub orientation: OrientationLayout,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default = "default_init_settle_ms")]
    pub init_settle_ms: u64,
    #[serde(default = "default_clock_settle_ms")]
    pub clock_settle_ms: u64,
}

fn default_imu_address() -> u8 {
    0x28
}

fn default_init_settle_ms() -> u64 {
    1000
}

fn default_clock_settle_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    /// Probe `GET /ping` once at startup
    #[serde(default = "default_influx_ping")]
    pub ping: bool,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

fn default_influx_ping() -> bool {
    true
}

fn default_ping_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound for a single sink delivery
    #[serde(default = "default_dispatch_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { timeout_ms: default_dispatch_timeout_ms() }
    }
}

fn default_dispatch_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Summary log interval (0 to disable)
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(rename = "deviceID", alias = "device_id", default)]
    pub device_id: Option<String>,
    pub imu: ImuConfig,
    pub influx: InfluxConfig,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    device_id: String,
    i2c_port: u8,
    imu_address: u8,
    updaterate: f64,
    udp_port: u16,
    topics: Vec<String>,
    orientation: OrientationLayout,
    tags: BTreeMap<String, String>,
    init_settle_ms: u64,
    clock_settle_ms: u64,
    influx_host: String,
    influx_port: u16,
    influx_ping: bool,
    influx_ping_timeout_ms: u64,
    mqtt: Option<MqttConfig>,
    dispatch_timeout_ms: u64,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: "bnoflux".to_string(),
            i2c_port: 0,
            imu_address: default_imu_address(),
            updaterate: 0.1,
            udp_port: 8089,
            topics: Vec::new(),
            orientation: OrientationLayout::Split,
            tags: default_tags(),
            init_settle_ms: default_init_settle_ms(),
            clock_settle_ms: default_clock_settle_ms(),
            influx_host: "localhost".to_string(),
            influx_port: 8086,
            influx_ping: true,
            influx_ping_timeout_ms: default_ping_timeout_ms(),
            mqtt: None,
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Parse a configuration file without validating it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        let is_json = path.extension().and_then(|e| e.to_str()).is_some_and(|e| e == "json");
        let file_config: FileConfig = if is_json {
            serde_json::from_str(&content)
                .map_err(|source| ConfigError::Json { path: path.to_path_buf(), source })?
        } else {
            toml::from_str(&content)
                .map_err(|source| ConfigError::Toml { path: path.to_path_buf(), source })?
        };

        Ok(Self::from_file_config(file_config, path.display().to_string()))
    }

    fn from_file_config(file: FileConfig, config_file: String) -> Self {
        let defaults = Self::default();
        Self {
            device_id: file.device_id.unwrap_or(defaults.device_id),
            i2c_port: file.imu.i2c_port,
            imu_address: file.imu.address,
            updaterate: file.imu.updaterate,
            udp_port: file.imu.udp_port,
            topics: file.imu.topics,
            orientation: file.imu.orientation,
            tags: file.imu.tags.unwrap_or(defaults.tags),
            init_settle_ms: file.imu.init_settle_ms,
            clock_settle_ms: file.imu.clock_settle_ms,
            influx_host: file.influx.host,
            influx_port: file.influx.port,
            influx_ping: file.influx.ping,
            influx_ping_timeout_ms: file.influx.ping_timeout_ms,
            mqtt: file.mqtt,
            dispatch_timeout_ms: file.dispatch.timeout_ms,
            metrics_interval_secs: file.metrics.interval_secs,
            config_file,
        }
    }

    /// Load and validate a configuration file
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration from discrete CLI flags. The broker stays disabled.
    pub fn from_flags(
        i2c_port: u8,
        updaterate: f64,
        udp_port: u16,
        db_host: &str,
        db_port: u16,
    ) -> Self {
        Self {
            i2c_port,
            updaterate,
            udp_port,
            influx_host: db_host.to_string(),
            influx_port: db_port,
            config_file: "flags".to_string(),
            ..Self::default()
        }
    }

    /// Reject configurations that would fail during steady-state sampling
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.updaterate.is_finite() || self.updaterate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "imu.updaterate must be a positive number of seconds, got {}",
                self.updaterate
            )));
        }
        if self.influx_host.trim().is_empty() {
            return Err(ConfigError::Invalid("influx.host must not be empty".to_string()));
        }
        if self.imu_address > 0x7F {
            return Err(ConfigError::Invalid(format!(
                "imu.address 0x{:02X} is not a 7-bit I2C address",
                self.imu_address
            )));
        }

        let Some(mqtt) = &self.mqtt else {
            return Ok(());
        };

        if mqtt.broker.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker must not be empty".to_string()));
        }
        if self.device_id.is_empty() || has_wildcard(&self.device_id) {
            return Err(ConfigError::Invalid(format!(
                "deviceID {:?} is not usable as a topic prefix",
                self.device_id
            )));
        }
        let expected = field_group_count(self.orientation);
        if self.topics.len() != expected {
            return Err(ConfigError::TopicCountMismatch { expected, actual: self.topics.len() });
        }
        if let Some(bad) = self.topics.iter().find(|t| t.is_empty() || has_wildcard(t)) {
            return Err(ConfigError::Invalid(format!("invalid topic suffix {:?}", bad)));
        }
        Ok(())
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn i2c_port(&self) -> u8 {
        self.i2c_port
    }

    /// Linux device node for the configured bus
    pub fn i2c_device(&self) -> String {
        format!("/dev/i2c-{}", self.i2c_port)
    }

    pub fn imu_address(&self) -> u8 {
        self.imu_address
    }

    pub fn updaterate(&self) -> f64 {
        self.updaterate
    }

    /// Sleep between cycles. Only meaningful after [`Config::validate`].
    pub fn update_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.updaterate).unwrap_or(Duration::from_millis(100))
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn orientation(&self) -> OrientationLayout {
        self.orientation
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn init_settle(&self) -> Duration {
        Duration::from_millis(self.init_settle_ms)
    }

    pub fn clock_settle(&self) -> Duration {
        Duration::from_millis(self.clock_settle_ms)
    }

    pub fn influx_host(&self) -> &str {
        &self.influx_host
    }

    pub fn influx_port(&self) -> u16 {
        self.influx_port
    }

    pub fn influx_ping(&self) -> bool {
        self.influx_ping
    }

    pub fn influx_ping_timeout(&self) -> Duration {
        Duration::from_millis(self.influx_ping_timeout_ms)
    }

    pub fn mqtt(&self) -> Option<&MqttConfig> {
        self.mqtt.as_ref()
    }

    pub fn broker_enabled(&self) -> bool {
        self.mqtt.is_some()
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to enable broker forwarding
    #[cfg(test)]
    pub fn with_mqtt(mut self, mqtt: MqttConfig, device_id: &str, topics: &[&str]) -> Self {
        self.mqtt = Some(mqtt);
        self.device_id = device_id.to_string();
        self.topics = topics.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Builder method for tests to set the orientation layout
    #[cfg(test)]
    pub fn with_orientation(mut self, orientation: OrientationLayout) -> Self {
        self.orientation = orientation;
        self
    }
}

/// MQTT wildcards are not allowed in publish topics
fn has_wildcard(s: &str) -> bool {
    s.contains('+') || s.contains('#')
}
