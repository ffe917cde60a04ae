//! IMU capability consumed by the acquisition loop and the calibration tool

use crate::domain::types::{CalibrationData, CalibrationStatus, Vector3, VectorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to open {path}: {message}")]
    Open { path: String, message: String },

    #[error("i2c bus error: {0}")]
    Bus(String),

    #[error("unexpected chip id 0x{found:02X} (expected 0x{expected:02X})")]
    UnexpectedChipId { found: u8, expected: u8 },

    #[error("sensor did not come back after reset")]
    ResetTimeout,
}

/// Operations the daemon needs from a 9-DOF sensor.
///
/// Calls block on bus I/O. Implementations are owned by one task at a time.
pub trait ImuSensor: Send {
    /// Bring the sensor up in fusion mode. An error means the device is unusable.
    fn initialize(&mut self) -> Result<(), SensorError>;

    /// Switch between the internal and the external crystal oscillator
    fn set_external_crystal(&mut self, enabled: bool) -> Result<(), SensorError>;

    fn read_vector(&mut self, kind: VectorKind) -> Result<Vector3, SensorError>;

    fn calibration_status(&mut self) -> Result<CalibrationStatus, SensorError>;

    fn calibration_data(&mut self) -> Result<CalibrationData, SensorError>;

    fn set_calibration_data(&mut self, data: &CalibrationData) -> Result<(), SensorError>;
}
