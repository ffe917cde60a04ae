//! Per-cycle fan-out of a batch to the database and broker sinks
//!
//! Each sink lives on its own long-lived task that owns the connection.
//! A cycle hands the batch to every worker and joins the replies, so the
//! loop sleeps only after both deliveries have finished or timed out.

use crate::domain::measurement::MeasurementBatch;
use crate::infra::metrics::Metrics;
use crate::io::sink::{Sink, SinkError, SinkKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct DeliveryJob {
    batch: Arc<MeasurementBatch>,
    reply: oneshot::Sender<bool>,
}

/// Handle to a task driving one sink
pub struct SinkWorker {
    kind: SinkKind,
    tx: Option<mpsc::Sender<DeliveryJob>>,
    handle: Option<JoinHandle<()>>,
}

impl SinkWorker {
    pub fn spawn(sink: Box<dyn Sink>, timeout: Duration) -> Self {
        let kind = sink.kind();
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(run_worker(sink, rx, timeout));
        Self { kind, tx: Some(tx), handle: Some(handle) }
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    /// Deliver one batch and wait for the outcome
    pub async fn deliver(&self, batch: Arc<MeasurementBatch>) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        let (reply, outcome) = oneshot::channel();
        if tx.send(DeliveryJob { batch, reply }).await.is_err() {
            warn!(sink = %self.kind, error = %SinkError::WorkerGone, "sink_delivery_failed");
            return false;
        }
        outcome.await.unwrap_or(false)
    }

    /// Stop accepting batches and wait for the sink to close
    pub async fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(sink = %self.kind, error = %e, "sink_worker_panicked");
            }
        }
    }
}

async fn run_worker(
    mut sink: Box<dyn Sink>,
    mut rx: mpsc::Receiver<DeliveryJob>,
    timeout: Duration,
) {
    let kind = sink.kind();
    info!(sink = %kind, timeout_ms = %timeout.as_millis(), "sink_worker_started");

    while let Some(job) = rx.recv().await {
        let result = match tokio::time::timeout(timeout, sink.deliver(&job.batch)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(timeout)),
        };

        let ok = match result {
            Ok(()) => true,
            Err(e) => {
                error!(sink = %kind, error_kind = ?e.kind(), error = %e, "sink_delivery_failed");
                false
            }
        };
        // The cycle may have been abandoned on shutdown
        let _ = job.reply.send(ok);
    }

    if tokio::time::timeout(timeout, sink.close()).await.is_err() {
        warn!(sink = %kind, "sink_close_timeout");
    }
    info!(sink = %kind, "sink_worker_stopped");
}

/// Outcome of one cycle. `broker` is `None` when forwarding is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub database: bool,
    pub broker: Option<bool>,
}

pub struct Dispatcher {
    database: SinkWorker,
    broker: Option<SinkWorker>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        database: Box<dyn Sink>,
        broker: Option<Box<dyn Sink>>,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            database: SinkWorker::spawn(database, timeout),
            broker: broker.map(|sink| SinkWorker::spawn(sink, timeout)),
            metrics,
        }
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker.is_some()
    }

    pub async fn deliver_to_database(&self, batch: Arc<MeasurementBatch>) -> bool {
        let start = Instant::now();
        let ok = self.database.deliver(batch).await;
        self.record(SinkKind::Database, ok, start);
        ok
    }

    pub async fn deliver_to_broker(&self, batch: Arc<MeasurementBatch>) -> Option<bool> {
        let worker = self.broker.as_ref()?;
        let start = Instant::now();
        let ok = worker.deliver(batch).await;
        self.record(SinkKind::Broker, ok, start);
        Some(ok)
    }

    /// Deliver to both sinks concurrently. Never fails.
    pub async fn dispatch(&self, batch: Arc<MeasurementBatch>) -> DispatchOutcome {
        let (database, broker) = tokio::join!(
            self.deliver_to_database(Arc::clone(&batch)),
            self.deliver_to_broker(batch)
        );
        DispatchOutcome { database, broker }
    }

    fn record(&self, kind: SinkKind, ok: bool, start: Instant) {
        self.metrics.record_delivery(kind, ok);
        if ok {
            debug!(sink = %kind, elapsed_us = %start.elapsed().as_micros(), "sink_delivered");
        }
    }

    /// Close both sinks. Pending batches are dropped.
    pub async fn close(self) {
        let Dispatcher { mut database, broker, .. } = self;
        let broker = async move {
            if let Some(mut worker) = broker {
                worker.shutdown().await;
            }
        };
        tokio::join!(database.shutdown(), broker);
        info!("dispatcher_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::measurement::{build_batch, default_tags, SensorSnapshot};
    use crate::domain::types::OrientationLayout;
    use crate::services::testing::MockSink;

    fn batch() -> Arc<MeasurementBatch> {
        Arc::new(build_batch(
            &SensorSnapshot::default(),
            OrientationLayout::Split,
            &default_tags(),
            1_000,
        ))
    }

    fn dispatcher(
        database: MockSink,
        broker: Option<MockSink>,
        timeout: Duration,
    ) -> (Dispatcher, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let broker = broker.map(|s| Box::new(s) as Box<dyn Sink>);
        (Dispatcher::new(Box::new(database), broker, timeout, Arc::clone(&metrics)), metrics)
    }

    #[tokio::test]
    async fn test_both_succeed() {
        let (db, db_probe) = MockSink::new(SinkKind::Database);
        let (mq, mq_probe) = MockSink::new(SinkKind::Broker);
        let (d, metrics) = dispatcher(db, Some(mq), Duration::from_secs(1));

        let outcome = d.dispatch(batch()).await;
        assert_eq!(outcome, DispatchOutcome { database: true, broker: Some(true) });
        assert_eq!(db_probe.delivered(), 1);
        assert_eq!(mq_probe.delivered(), 1);
        assert_eq!(metrics.delivered(SinkKind::Database), 1);
        assert_eq!(metrics.delivered(SinkKind::Broker), 1);
        d.close().await;
    }

    #[tokio::test]
    async fn test_database_failure_does_not_affect_broker() {
        let (db, _) = MockSink::failing(SinkKind::Database);
        let (mq, mq_probe) = MockSink::new(SinkKind::Broker);
        let (d, metrics) = dispatcher(db, Some(mq), Duration::from_secs(1));

        let outcome = d.dispatch(batch()).await;
        assert_eq!(outcome, DispatchOutcome { database: false, broker: Some(true) });
        assert_eq!(mq_probe.delivered(), 1);
        assert_eq!(metrics.failed(SinkKind::Database), 1);
        d.close().await;
    }

    #[tokio::test]
    async fn test_broker_failure_does_not_affect_database() {
        let (db, db_probe) = MockSink::new(SinkKind::Database);
        let (mq, _) = MockSink::failing(SinkKind::Broker);
        let (d, _) = dispatcher(db, Some(mq), Duration::from_secs(1));

        let outcome = d.dispatch(batch()).await;
        assert_eq!(outcome, DispatchOutcome { database: true, broker: Some(false) });
        assert_eq!(db_probe.delivered(), 1);

        // Next cycle still runs both
        let outcome = d.dispatch(batch()).await;
        assert_eq!(outcome, DispatchOutcome { database: true, broker: Some(false) });
        assert_eq!(db_probe.delivered(), 2);
        d.close().await;
    }

    #[tokio::test]
    async fn test_both_fail() {
        let (db, _) = MockSink::failing(SinkKind::Database);
        let (mq, _) = MockSink::failing(SinkKind::Broker);
        let (d, _) = dispatcher(db, Some(mq), Duration::from_secs(1));

        let outcome = d.dispatch(batch()).await;
        assert_eq!(outcome, DispatchOutcome { database: false, broker: Some(false) });
        d.close().await;
    }

    #[tokio::test]
    async fn test_broker_disabled() {
        let (db, _) = MockSink::new(SinkKind::Database);
        let (d, _) = dispatcher(db, None, Duration::from_secs(1));

        assert!(!d.broker_enabled());
        assert_eq!(d.deliver_to_broker(batch()).await, None);
        let outcome = d.dispatch(batch()).await;
        assert_eq!(outcome, DispatchOutcome { database: true, broker: None });
        d.close().await;
    }

    #[tokio::test]
    async fn test_slow_sink_times_out_without_delaying_other() {
        let (db, db_probe) = MockSink::new(SinkKind::Database);
        let (mq, _) = MockSink::slow(SinkKind::Broker, Duration::from_secs(30));
        let (d, _) = dispatcher(db, Some(mq), Duration::from_millis(100));

        let start = Instant::now();
        let outcome = d.dispatch(batch()).await;
        assert_eq!(outcome, DispatchOutcome { database: true, broker: Some(false) });
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(db_probe.delivered(), 1);
        d.close().await;
    }

    #[tokio::test]
    async fn test_close_closes_every_sink() {
        let (db, db_probe) = MockSink::new(SinkKind::Database);
        let (mq, mq_probe) = MockSink::new(SinkKind::Broker);
        let (d, _) = dispatcher(db, Some(mq), Duration::from_secs(1));

        d.dispatch(batch()).await;
        d.close().await;
        assert!(db_probe.closed());
        assert!(mq_probe.closed());
    }

    #[tokio::test]
    async fn test_same_batch_reaches_both_sinks() {
        let (db, db_probe) = MockSink::new(SinkKind::Database);
        let (mq, mq_probe) = MockSink::new(SinkKind::Broker);
        let (d, _) = dispatcher(db, Some(mq), Duration::from_secs(1));

        d.dispatch(batch()).await;
        d.close().await;
        let db_batches: Vec<MeasurementBatch> = db_probe.batches();
        let mq_batches: Vec<MeasurementBatch> = mq_probe.batches();
        assert_eq!(db_batches.len(), 1);
        assert_eq!(db_batches, mq_batches);
    }
}
