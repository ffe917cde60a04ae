//! bnoflux library
//!
//! BNO055 acquisition daemon: samples the IMU, ships each batch to InfluxDB
//! over UDP and optionally republishes it to an MQTT broker.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
