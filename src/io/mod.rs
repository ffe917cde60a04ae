//! IO modules - external system interfaces
//!
//! - `sensor` - IMU capability trait
//! - `bno055` - BNO055 driver over Linux I2C
//! - `line_protocol` - InfluxDB line protocol encoding
//! - `sink` - Delivery target trait shared by both outputs
//! - `influx_udp` - InfluxDB UDP sink and HTTP ping
//! - `mqtt_sink` - MQTT sink with per-batch acknowledgement

pub mod bno055;
pub mod influx_udp;
pub mod line_protocol;
pub mod mqtt_sink;
pub mod sensor;
pub mod sink;

// Re-export commonly used types
pub use bno055::Bno055;
pub use influx_udp::InfluxUdpSink;
pub use mqtt_sink::MqttSink;
pub use sensor::{ImuSensor, SensorError};
pub use sink::{Sink, SinkError, SinkKind};
