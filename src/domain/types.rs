//! Shared sensor types

use serde::{Deserialize, Serialize};

/// One three-axis reading as delivered by the sensor, already scaled to
/// physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: f64) -> Self {
        Self { x: v, y: v, z: v }
    }
}

impl std::fmt::Display for Vector3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x:{}, y:{}, z:{}", self.x, self.y, self.z)
    }
}

/// Vector outputs exposed by the IMU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorKind {
    Accelerometer,
    Magnetometer,
    Gyroscope,
    Euler,
    LinearAcceleration,
    Gravity,
}

impl VectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorKind::Accelerometer => "accelerometer",
            VectorKind::Magnetometer => "magnetometer",
            VectorKind::Gyroscope => "gyroscope",
            VectorKind::Euler => "euler",
            VectorKind::LinearAcceleration => "linear_acceleration",
            VectorKind::Gravity => "gravity",
        }
    }
}

/// Orientation with named axes.
///
/// The BNO055 euler registers are laid out heading, roll, pitch. That order
/// is resolved once in [`EulerAngles::from_heading_roll_pitch`]; everything
/// downstream uses the names.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerAngles {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl EulerAngles {
    pub fn from_heading_roll_pitch(v: Vector3) -> Self {
        Self { yaw: v.x, roll: v.y, pitch: v.z }
    }

    pub const fn splat(v: f64) -> Self {
        Self { yaw: v, pitch: v, roll: v }
    }
}

/// How orientation angles are grouped into field groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationLayout {
    /// yaw, pitch and roll each in their own group (one broker topic each)
    #[default]
    Split,
    /// a single orientation group carrying all three angles
    Combined,
}

/// Per-subsystem calibration levels, each 0 (uncalibrated) to 3 (fully calibrated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CalibrationStatus {
    pub system: u8,
    pub gyro: u8,
    pub accel: u8,
    pub mag: u8,
}

impl CalibrationStatus {
    /// Decode the CALIB_STAT register (sys:7-6, gyro:5-4, accel:3-2, mag:1-0)
    pub fn from_register(value: u8) -> Self {
        Self {
            system: (value >> 6) & 0x03,
            gyro: (value >> 4) & 0x03,
            accel: (value >> 2) & 0x03,
            mag: value & 0x03,
        }
    }

    pub fn is_fully_calibrated(&self) -> bool {
        self.system == 3 && self.gyro == 3 && self.accel == 3 && self.mag == 3
    }
}

impl std::fmt::Display for CalibrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sys={} gyro={} accel={} mag={}", self.system, self.gyro, self.accel, self.mag)
    }
}

/// Number of calibration bytes (accel, mag and gyro offsets plus radii)
pub const CALIBRATION_LEN: usize = 22;

/// Raw calibration profile as stored in the sensor's offset registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationData(pub [u8; CALIBRATION_LEN]);
