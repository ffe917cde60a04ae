//! Test doubles for the sensor and the sinks

use crate::domain::measurement::MeasurementBatch;
use crate::domain::types::{CalibrationData, CalibrationStatus, Vector3, VectorKind, CALIBRATION_LEN};
use crate::io::sensor::{ImuSensor, SensorError};
use crate::io::sink::{Sink, SinkError, SinkKind};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ProbeState {
    batches: Vec<MeasurementBatch>,
    attempts: usize,
    closed: bool,
}

/// Shared view of what a [`MockSink`] received
#[derive(Clone, Default)]
pub struct SinkProbe(Arc<Mutex<ProbeState>>);

impl SinkProbe {
    pub fn delivered(&self) -> usize {
        self.0.lock().unwrap().batches.len()
    }

    pub fn attempts(&self) -> usize {
        self.0.lock().unwrap().attempts
    }

    pub fn batches(&self) -> Vec<MeasurementBatch> {
        self.0.lock().unwrap().batches.clone()
    }

    pub fn closed(&self) -> bool {
        self.0.lock().unwrap().closed
    }
}

enum Behavior {
    Succeed,
    Fail,
    Slow(Duration),
}

pub struct MockSink {
    kind: SinkKind,
    behavior: Behavior,
    probe: SinkProbe,
}

impl MockSink {
    fn with_behavior(kind: SinkKind, behavior: Behavior) -> (Self, SinkProbe) {
        let probe = SinkProbe::default();
        (Self { kind, behavior, probe: probe.clone() }, probe)
    }

    pub fn new(kind: SinkKind) -> (Self, SinkProbe) {
        Self::with_behavior(kind, Behavior::Succeed)
    }

    pub fn failing(kind: SinkKind) -> (Self, SinkProbe) {
        Self::with_behavior(kind, Behavior::Fail)
    }

    pub fn slow(kind: SinkKind, delay: Duration) -> (Self, SinkProbe) {
        Self::with_behavior(kind, Behavior::Slow(delay))
    }
}

#[async_trait]
impl Sink for MockSink {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn deliver(&mut self, batch: &MeasurementBatch) -> Result<(), SinkError> {
        self.probe.0.lock().unwrap().attempts += 1;
        match self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail => {
                return Err(SinkError::Transport(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )))
            }
            Behavior::Slow(delay) => tokio::time::sleep(delay).await,
        }
        self.probe.0.lock().unwrap().batches.push(batch.clone());
        Ok(())
    }

    async fn close(&mut self) {
        self.probe.0.lock().unwrap().closed = true;
    }
}

#[derive(Default)]
struct SensorLog {
    reads: Vec<VectorKind>,
    crystal: Option<bool>,
    status_polls: usize,
    written: Option<CalibrationData>,
}

/// Shared view of the calls made on a [`MockSensor`]
#[derive(Clone, Default)]
pub struct SensorProbe(Arc<Mutex<SensorLog>>);

impl SensorProbe {
    pub fn reads(&self) -> Vec<VectorKind> {
        self.0.lock().unwrap().reads.clone()
    }

    pub fn crystal(&self) -> Option<bool> {
        self.0.lock().unwrap().crystal
    }

    pub fn status_polls(&self) -> usize {
        self.0.lock().unwrap().status_polls
    }

    pub fn written(&self) -> Option<CalibrationData> {
        self.0.lock().unwrap().written
    }
}

/// Scripted sensor returning fixed vectors
pub struct MockSensor {
    fail_init: bool,
    /// Fail the read with this zero-based index
    fail_read_at: Option<usize>,
    /// Status polls before reporting full calibration
    calibrated_after: usize,
    probe: SensorProbe,
}

pub const MOCK_LINEAR: Vector3 = Vector3 { x: 0.5, y: -0.25, z: 0.0 };
pub const MOCK_GRAVITY: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 9.8 };
/// Register order: heading, roll, pitch
pub const MOCK_EULER: Vector3 = Vector3 { x: 270.0, y: -3.0, z: 12.5 };

impl MockSensor {
    pub fn new() -> (Self, SensorProbe) {
        let probe = SensorProbe::default();
        let sensor = Self {
            fail_init: false,
            fail_read_at: None,
            calibrated_after: 0,
            probe: probe.clone(),
        };
        (sensor, probe)
    }

    pub fn failing_init() -> (Self, SensorProbe) {
        let (mut sensor, probe) = Self::new();
        sensor.fail_init = true;
        (sensor, probe)
    }

    pub fn failing_read_at(index: usize) -> (Self, SensorProbe) {
        let (mut sensor, probe) = Self::new();
        sensor.fail_read_at = Some(index);
        (sensor, probe)
    }

    pub fn calibrated_after(polls: usize) -> (Self, SensorProbe) {
        let (mut sensor, probe) = Self::new();
        sensor.calibrated_after = polls;
        (sensor, probe)
    }
}

impl ImuSensor for MockSensor {
    fn initialize(&mut self) -> Result<(), SensorError> {
        if self.fail_init {
            return Err(SensorError::UnexpectedChipId { found: 0x00, expected: 0xA0 });
        }
        Ok(())
    }

    fn set_external_crystal(&mut self, enabled: bool) -> Result<(), SensorError> {
        self.probe.0.lock().unwrap().crystal = Some(enabled);
        Ok(())
    }

    fn read_vector(&mut self, kind: VectorKind) -> Result<Vector3, SensorError> {
        let mut log = self.probe.0.lock().unwrap();
        if self.fail_read_at == Some(log.reads.len()) {
            return Err(SensorError::Bus("remote I/O error".to_string()));
        }
        log.reads.push(kind);
        Ok(match kind {
            VectorKind::LinearAcceleration => MOCK_LINEAR,
            VectorKind::Gravity => MOCK_GRAVITY,
            VectorKind::Euler => MOCK_EULER,
            _ => Vector3::default(),
        })
    }

    fn calibration_status(&mut self) -> Result<CalibrationStatus, SensorError> {
        let mut log = self.probe.0.lock().unwrap();
        log.status_polls += 1;
        let level = if log.status_polls > self.calibrated_after { 3 } else { 1 };
        Ok(CalibrationStatus { system: level, gyro: 3, accel: level, mag: level })
    }

    fn calibration_data(&mut self) -> Result<CalibrationData, SensorError> {
        let mut bytes = [0u8; CALIBRATION_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        Ok(CalibrationData(bytes))
    }

    fn set_calibration_data(&mut self, data: &CalibrationData) -> Result<(), SensorError> {
        self.probe.0.lock().unwrap().written = Some(*data);
        Ok(())
    }
}
