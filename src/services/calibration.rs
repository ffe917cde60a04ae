//! Interactive calibration: wait until every subsystem reports level 3,
//! then read the profile and write it back so it is active immediately.

use crate::domain::types::{CalibrationData, CalibrationStatus};
use crate::io::sensor::{ImuSensor, SensorError};
use crate::services::acquisition::{on_blocking_thread, wait_or_interrupt};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct CalibrationTiming {
    pub init_settle: Duration,
    pub poll_interval: Duration,
    /// Pause between reading the profile and writing it back
    pub write_settle: Duration,
}

impl Default for CalibrationTiming {
    fn default() -> Self {
        Self {
            init_settle: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            write_settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationOutcome {
    Calibrated(CalibrationData),
    Interrupted,
}

/// Bring the sensor up and poll until fully calibrated.
///
/// `on_status` sees every status change. Returns the sensor so the caller
/// can keep using it.
pub async fn calibrate<S, F>(
    sensor: S,
    timing: CalibrationTiming,
    shutdown: &mut watch::Receiver<bool>,
    mut on_status: F,
) -> Result<(S, CalibrationOutcome), SensorError>
where
    S: ImuSensor + 'static,
    F: FnMut(CalibrationStatus),
{
    let (sensor, ()) = on_blocking_thread(sensor, |s| s.initialize()).await?;
    if wait_or_interrupt(shutdown, timing.init_settle).await {
        return Ok((sensor, CalibrationOutcome::Interrupted));
    }
    let (mut sensor, ()) = on_blocking_thread(sensor, |s| s.set_external_crystal(true)).await?;

    let mut last: Option<CalibrationStatus> = None;
    loop {
        let status = sensor.calibration_status()?;
        if last != Some(status) {
            info!(status = %status, "calibration_status");
            on_status(status);
            last = Some(status);
        }
        if status.is_fully_calibrated() {
            break;
        }
        if wait_or_interrupt(shutdown, timing.poll_interval).await {
            return Ok((sensor, CalibrationOutcome::Interrupted));
        }
    }

    let (sensor, profile) = on_blocking_thread(sensor, |s| s.calibration_data()).await?;
    info!(profile = ?profile.0, "calibration_read");

    if wait_or_interrupt(shutdown, timing.write_settle).await {
        return Ok((sensor, CalibrationOutcome::Interrupted));
    }
    let (sensor, ()) =
        on_blocking_thread(sensor, move |s| s.set_calibration_data(&profile)).await?;
    info!("calibration_applied");

    Ok((sensor, CalibrationOutcome::Calibrated(profile)))
}

/// Write a previously saved profile to the sensor
pub async fn restore<S: ImuSensor + 'static>(
    sensor: S,
    profile: CalibrationData,
) -> Result<S, SensorError> {
    let (sensor, ()) = on_blocking_thread(sensor, |s| s.initialize()).await?;
    let (sensor, ()) =
        on_blocking_thread(sensor, move |s| s.set_calibration_data(&profile)).await?;
    info!("calibration_restored");
    Ok(sensor)
}

pub fn save_profile(path: &Path, profile: &CalibrationData) -> io::Result<()> {
    let json = serde_json::to_string(profile)?;
    fs::write(path, json + "\n")
}

pub fn load_profile(path: &Path) -> io::Result<CalibrationData> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::CALIBRATION_LEN;
    use crate::services::testing::MockSensor;

    fn fast() -> CalibrationTiming {
        CalibrationTiming {
            init_settle: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
            write_settle: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_polls_until_calibrated_then_writes_back() {
        let (sensor, probe) = MockSensor::calibrated_after(3);
        let (_tx, mut rx) = watch::channel(false);
        let mut seen = Vec::new();

        let (_, outcome) =
            calibrate(sensor, fast(), &mut rx, |status| seen.push(status)).await.unwrap();

        let CalibrationOutcome::Calibrated(profile) = outcome else {
            panic!("expected calibrated, got {:?}", outcome);
        };
        assert_eq!(probe.status_polls(), 4);
        assert_eq!(probe.crystal(), Some(true));
        assert_eq!(probe.written(), Some(profile));
        // One callback per distinct status
        assert_eq!(seen.len(), 2);
        assert!(seen[1].is_fully_calibrated());
    }

    #[tokio::test]
    async fn test_interrupt_while_polling() {
        let (sensor, probe) = MockSensor::calibrated_after(usize::MAX);
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });

        let (_, outcome) = calibrate(sensor, fast(), &mut rx, |_| {}).await.unwrap();
        assert_eq!(outcome, CalibrationOutcome::Interrupted);
        assert!(probe.written().is_none());
    }

    #[tokio::test]
    async fn test_init_failure_propagates() {
        let (sensor, _) = MockSensor::failing_init();
        let (_tx, mut rx) = watch::channel(false);
        assert!(calibrate(sensor, fast(), &mut rx, |_| {}).await.is_err());
    }

    #[tokio::test]
    async fn test_restore_writes_profile() {
        let (sensor, probe) = MockSensor::new();
        let profile = CalibrationData([7u8; CALIBRATION_LEN]);
        restore(sensor, profile).await.unwrap();
        assert_eq!(probe.written(), Some(profile));
    }

    #[test]
    fn test_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        let mut bytes = [0u8; CALIBRATION_LEN];
        bytes[0] = 0xF6;
        bytes[21] = 0x03;
        let profile = CalibrationData(bytes);

        save_profile(&path, &profile).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("[246,0,"));
        assert_eq!(load_profile(&path).unwrap(), profile);
    }

    #[test]
    fn test_load_profile_rejects_short() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.json");
        fs::write(&path, "[1,2,3]").unwrap();
        assert!(load_profile(&path).is_err());
    }
}
