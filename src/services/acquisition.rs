//! Sampling loop: initialize the sensor, then read, build, dispatch, sleep
//!
//! The loop owns the sensor and the dispatcher. Every terminal path closes
//! the dispatcher before `run` returns.

use crate::domain::measurement::{build_batch, epoch_ns, SensorSnapshot};
use crate::domain::types::{EulerAngles, OrientationLayout, Vector3, VectorKind};
use crate::infra::config::Config;
use crate::infra::error::{AppError, ErrorKind, EXIT_OK};
use crate::infra::metrics::Metrics;
use crate::io::sensor::{ImuSensor, SensorError};
use crate::services::dispatcher::Dispatcher;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupted,
    FatalInit,
    FatalRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Initializing,
    /// Settle waits and clock source switch
    Calibrating,
    Sampling,
    Terminated(Termination),
}

/// Delays of the startup sequence and the cycle period
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub init_settle: Duration,
    pub clock_settle: Duration,
    pub update_interval: Duration,
}

impl Timing {
    pub fn from_config(config: &Config) -> Self {
        Self {
            init_settle: config.init_settle(),
            clock_settle: config.clock_settle(),
            update_interval: config.update_interval(),
        }
    }
}

/// How the loop ended
#[derive(Debug)]
pub struct LoopReport {
    pub state: LoopState,
    pub cycles: u64,
    pub result: Result<(), AppError>,
}

impl LoopReport {
    pub fn exit_code(&self) -> u8 {
        match &self.result {
            Ok(()) => EXIT_OK,
            Err(e) => e.exit_code(),
        }
    }
}

pub struct AcquisitionLoop<S> {
    sensor: S,
    dispatcher: Dispatcher,
    layout: OrientationLayout,
    tags: BTreeMap<String, String>,
    timing: Timing,
    metrics: Arc<Metrics>,
}

impl<S: ImuSensor + 'static> AcquisitionLoop<S> {
    pub fn new(
        sensor: S,
        dispatcher: Dispatcher,
        layout: OrientationLayout,
        tags: BTreeMap<String, String>,
        timing: Timing,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { sensor, dispatcher, layout, tags, timing, metrics }
    }

    /// Run until interrupted or a fatal sensor error
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> LoopReport {
        let AcquisitionLoop { sensor, dispatcher, layout, tags, timing, metrics } = self;
        let mut session = Session {
            dispatcher: &dispatcher,
            layout,
            tags,
            timing,
            metrics,
            state: LoopState::Uninitialized,
            cycles: 0,
        };

        let result = session.drive(sensor, &mut shutdown).await;
        let termination = match &result {
            Ok(()) => Termination::Interrupted,
            Err(e) if e.kind() == ErrorKind::FatalRuntime => Termination::FatalRuntime,
            Err(_) => Termination::FatalInit,
        };
        session.transition(LoopState::Terminated(termination));
        let (state, cycles) = (session.state, session.cycles);

        dispatcher.close().await;
        info!(state = ?state, cycles = %cycles, "acquisition_stopped");
        LoopReport { state, cycles, result }
    }
}

struct Session<'a> {
    dispatcher: &'a Dispatcher,
    layout: OrientationLayout,
    tags: BTreeMap<String, String>,
    timing: Timing,
    metrics: Arc<Metrics>,
    state: LoopState,
    cycles: u64,
}

impl Session<'_> {
    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "loop_state");
        self.state = next;
    }

    async fn drive<S: ImuSensor + 'static>(
        &mut self,
        sensor: S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), AppError> {
        self.transition(LoopState::Initializing);
        let (sensor, ()) = on_blocking_thread(sensor, |s| s.initialize()).await.map_err(|e| {
            error!(error = %e, "sensor_init_failed");
            AppError::SensorInit(e)
        })?;
        info!("sensor_initialized");

        self.transition(LoopState::Calibrating);
        if wait_or_interrupt(shutdown, self.timing.init_settle).await {
            return Ok(());
        }
        let (mut sensor, ()) = on_blocking_thread(sensor, |s| s.set_external_crystal(true))
            .await
            .map_err(|e| {
                error!(error = %e, "clock_source_failed");
                AppError::SensorInit(e)
            })?;
        if wait_or_interrupt(shutdown, self.timing.clock_settle).await {
            return Ok(());
        }

        self.transition(LoopState::Sampling);
        info!(
            interval_ms = %self.timing.update_interval.as_millis(),
            layout = ?self.layout,
            broker = %self.dispatcher.broker_enabled(),
            "sampling_started"
        );

        loop {
            let start = Instant::now();
            let snapshot = read_snapshot(&mut sensor).map_err(|e| {
                error!(error = %e, cycle = %self.cycles, "sensor_read_failed");
                AppError::SensorRead(e)
            })?;
            if *shutdown.borrow() {
                return Ok(());
            }

            let batch = Arc::new(build_batch(&snapshot, self.layout, &self.tags, epoch_ns()));
            let outcome = self.dispatcher.dispatch(batch).await;

            self.cycles += 1;
            self.metrics.record_cycle(start.elapsed().as_micros() as u64);
            debug!(
                cycle = %self.cycles,
                database = %outcome.database,
                broker = ?outcome.broker,
                "cycle_complete"
            );

            if wait_or_interrupt(shutdown, self.timing.update_interval).await {
                return Ok(());
            }
        }
    }
}

/// Read the three vectors in fixed order
fn read_snapshot<S: ImuSensor>(sensor: &mut S) -> Result<SensorSnapshot, SensorError> {
    let mut snapshot = SensorSnapshot::default();
    snapshot.linear_acceleration = read_vector(sensor, VectorKind::LinearAcceleration)?;
    snapshot.gravity = read_vector(sensor, VectorKind::Gravity)?;
    let euler = read_vector(sensor, VectorKind::Euler)?;
    snapshot.euler = EulerAngles::from_heading_roll_pitch(euler);
    Ok(snapshot)
}

fn read_vector<S: ImuSensor>(sensor: &mut S, kind: VectorKind) -> Result<Vector3, SensorError> {
    let vector = sensor.read_vector(kind)?;
    debug!(kind = kind.as_str(), vector = %vector, "vector_read");
    Ok(vector)
}

/// Run a slow sensor operation off the async workers, handing the sensor back
pub(crate) async fn on_blocking_thread<S, T, F>(
    mut sensor: S,
    op: F,
) -> Result<(S, T), SensorError>
where
    S: ImuSensor + 'static,
    T: Send + 'static,
    F: FnOnce(&mut S) -> Result<T, SensorError> + Send + 'static,
{
    let (sensor, result) = tokio::task::spawn_blocking(move || {
        let result = op(&mut sensor);
        (sensor, result)
    })
    .await
    .map_err(|e| SensorError::Bus(format!("sensor task failed: {}", e)))?;
    result.map(|value| (sensor, value))
}

/// Sleep for `duration`. Returns true if shutdown was requested meanwhile.
pub async fn wait_or_interrupt(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown.borrow_and_update() {
        return true;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) => {
                    if *shutdown.borrow_and_update() {
                        return true;
                    }
                }
                Err(_) => {
                    // Nobody can signal any more
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}
