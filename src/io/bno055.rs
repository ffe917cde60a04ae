//! Bosch BNO055 register-level driver
//!
//! Only what the daemon and the calibration tool need: bring-up in NDOF
//! fusion mode, clock source selection, vector reads and calibration
//! profile access.
//!
//! Vector registers hold three little-endian i16 values (x, y, z).
//! Scale factors (LSB per unit):
//! - euler: 16 LSB/deg (x = heading, y = roll, z = pitch)
//! - acceleration, linear acceleration, gravity: 100 LSB/(m/s²)
//! - magnetometer: 16 LSB/µT
//! - gyroscope: 900 LSB/(rad/s)

use crate::domain::types::{
    CalibrationData, CalibrationStatus, Vector3, VectorKind, CALIBRATION_LEN,
};
use crate::io::sensor::{ImuSensor, SensorError};
use embedded_hal::i2c::I2c;
use linux_embedded_hal::I2cdev;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default I2C address (ADR pin low)
pub const DEFAULT_ADDRESS: u8 = 0x28;
/// Alternate I2C address (ADR pin high)
pub const ALTERNATE_ADDRESS: u8 = 0x29;

const CHIP_ID: u8 = 0xA0;

// Page 0 registers
const REG_CHIP_ID: u8 = 0x00;
const REG_PAGE_ID: u8 = 0x07;
const REG_ACCEL_DATA: u8 = 0x08;
const REG_MAG_DATA: u8 = 0x0E;
const REG_GYRO_DATA: u8 = 0x14;
const REG_EULER_DATA: u8 = 0x1A;
const REG_LINEAR_ACCEL_DATA: u8 = 0x28;
const REG_GRAVITY_DATA: u8 = 0x2E;
const REG_CALIB_STAT: u8 = 0x35;
const REG_OPR_MODE: u8 = 0x3D;
const REG_PWR_MODE: u8 = 0x3E;
const REG_SYS_TRIGGER: u8 = 0x3F;
const REG_ACCEL_OFFSET_X_LSB: u8 = 0x55;

const SYS_TRIGGER_RESET: u8 = 0x20;
const SYS_TRIGGER_EXT_CLOCK: u8 = 0x80;
const POWER_MODE_NORMAL: u8 = 0x00;

/// Polls of the chip id after a reset before giving up
const MAX_RESET_POLLS: usize = 100;

/// Operation modes used by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationMode {
    Config = 0x00,
    Ndof = 0x0C,
}

/// Datasheet delays around mode switches and resets
#[derive(Debug, Clone, Copy)]
pub struct Bno055Timing {
    pub boot: Duration,
    pub reset: Duration,
    pub reset_poll: Duration,
    pub mode_switch: Duration,
    pub register_settle: Duration,
}

impl Default for Bno055Timing {
    fn default() -> Self {
        Self {
            boot: Duration::from_secs(1),
            reset: Duration::from_secs(1),
            reset_poll: Duration::from_millis(10),
            mode_switch: Duration::from_millis(30),
            register_settle: Duration::from_millis(10),
        }
    }
}

impl Bno055Timing {
    /// No delays, for simulated buses
    pub fn immediate() -> Self {
        Self {
            boot: Duration::ZERO,
            reset: Duration::ZERO,
            reset_poll: Duration::ZERO,
            mode_switch: Duration::ZERO,
            register_settle: Duration::ZERO,
        }
    }
}

pub struct Bno055<I> {
    i2c: I,
    address: u8,
    mode: OperationMode,
    timing: Bno055Timing,
}

impl Bno055<I2cdev> {
    /// Open the sensor on a Linux i2c-dev node such as `/dev/i2c-1`
    pub fn open(path: &str, address: u8) -> Result<Self, SensorError> {
        let i2c = I2cdev::new(path)
            .map_err(|e| SensorError::Open { path: path.to_string(), message: e.to_string() })?;
        info!(path = %path, address = %format!("0x{:02X}", address), "bno055_opened");
        Ok(Self::new(i2c, address))
    }
}

impl<I: I2c> Bno055<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        Self { i2c, address, mode: OperationMode::Ndof, timing: Bno055Timing::default() }
    }

    pub fn with_timing(mut self, timing: Bno055Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Give the bus back
    pub fn release(self) -> I {
        self.i2c
    }

    fn read_bytes(&mut self, register: u8, buf: &mut [u8]) -> Result<(), SensorError> {
        self.i2c
            .write_read(self.address, &[register], buf)
            .map_err(|e| SensorError::Bus(format!("read 0x{:02X}: {:?}", register, e)))
    }

    fn read_u8(&mut self, register: u8) -> Result<u8, SensorError> {
        let mut buf = [0u8; 1];
        self.read_bytes(register, &mut buf)?;
        Ok(buf[0])
    }

    fn write_u8(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(|e| SensorError::Bus(format!("write 0x{:02X}: {:?}", register, e)))
    }

    fn set_mode(&mut self, mode: OperationMode) -> Result<(), SensorError> {
        self.write_u8(REG_OPR_MODE, mode as u8)?;
        thread::sleep(self.timing.mode_switch);
        self.mode = mode;
        Ok(())
    }

    /// Run `f` in config mode, then restore the previous mode
    fn in_config_mode<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SensorError>,
    ) -> Result<T, SensorError> {
        let previous = self.mode;
        self.set_mode(OperationMode::Config)?;
        let result = f(self);
        self.set_mode(previous)?;
        result
    }

    fn wait_for_chip_id(&mut self) -> Result<(), SensorError> {
        for _ in 0..MAX_RESET_POLLS {
            // The device NACKs while it reboots
            if let Ok(CHIP_ID) = self.read_u8(REG_CHIP_ID) {
                return Ok(());
            }
            thread::sleep(self.timing.reset_poll);
        }
        Err(SensorError::ResetTimeout)
    }
}

fn vector_register(kind: VectorKind) -> (u8, f64) {
    match kind {
        VectorKind::Accelerometer => (REG_ACCEL_DATA, 100.0),
        VectorKind::Magnetometer => (REG_MAG_DATA, 16.0),
        VectorKind::Gyroscope => (REG_GYRO_DATA, 900.0),
        VectorKind::Euler => (REG_EULER_DATA, 16.0),
        VectorKind::LinearAcceleration => (REG_LINEAR_ACCEL_DATA, 100.0),
        VectorKind::Gravity => (REG_GRAVITY_DATA, 100.0),
    }
}

impl<I: I2c + Send> ImuSensor for Bno055<I> {
    fn initialize(&mut self) -> Result<(), SensorError> {
        let mut chip_id = self.read_u8(REG_CHIP_ID)?;
        if chip_id != CHIP_ID {
            // Still booting
            thread::sleep(self.timing.boot);
            chip_id = self.read_u8(REG_CHIP_ID)?;
            if chip_id != CHIP_ID {
                return Err(SensorError::UnexpectedChipId { found: chip_id, expected: CHIP_ID });
            }
        }

        self.set_mode(OperationMode::Config)?;

        self.write_u8(REG_SYS_TRIGGER, SYS_TRIGGER_RESET)?;
        thread::sleep(self.timing.reset);
        self.wait_for_chip_id()?;
        thread::sleep(self.timing.register_settle * 5);

        self.write_u8(REG_PWR_MODE, POWER_MODE_NORMAL)?;
        thread::sleep(self.timing.register_settle);
        self.write_u8(REG_PAGE_ID, 0)?;
        self.write_u8(REG_SYS_TRIGGER, 0)?;
        thread::sleep(self.timing.register_settle);

        self.set_mode(OperationMode::Ndof)?;
        debug!(address = %format!("0x{:02X}", self.address), "bno055_initialized");
        Ok(())
    }

    fn set_external_crystal(&mut self, enabled: bool) -> Result<(), SensorError> {
        let trigger = if enabled { SYS_TRIGGER_EXT_CLOCK } else { 0 };
        let settle = self.timing.register_settle;
        self.in_config_mode(|dev| {
            dev.write_u8(REG_PAGE_ID, 0)?;
            dev.write_u8(REG_SYS_TRIGGER, trigger)?;
            thread::sleep(settle);
            Ok(())
        })
    }

    fn read_vector(&mut self, kind: VectorKind) -> Result<Vector3, SensorError> {
        let (register, scale) = vector_register(kind);
        let mut buf = [0u8; 6];
        self.read_bytes(register, &mut buf)?;

        let axis = |i: usize| f64::from(i16::from_le_bytes([buf[i], buf[i + 1]])) / scale;
        Ok(Vector3::new(axis(0), axis(2), axis(4)))
    }

    fn calibration_status(&mut self) -> Result<CalibrationStatus, SensorError> {
        Ok(CalibrationStatus::from_register(self.read_u8(REG_CALIB_STAT)?))
    }

    fn calibration_data(&mut self) -> Result<CalibrationData, SensorError> {
        self.in_config_mode(|dev| {
            let mut data = [0u8; CALIBRATION_LEN];
            dev.read_bytes(REG_ACCEL_OFFSET_X_LSB, &mut data)?;
            Ok(CalibrationData(data))
        })
    }

    fn set_calibration_data(&mut self, data: &CalibrationData) -> Result<(), SensorError> {
        let address = self.address;
        self.in_config_mode(|dev| {
            let mut frame = [0u8; CALIBRATION_LEN + 1];
            frame[0] = REG_ACCEL_OFFSET_X_LSB;
            frame[1..].copy_from_slice(&data.0);
            dev.i2c.write(address, &frame).map_err(|e| {
                warn!(error = ?e, "bno055_calibration_write_failed");
                SensorError::Bus(format!("write calibration: {:?}", e))
            })
        })
    }
}
