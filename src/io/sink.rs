//! Delivery targets for measurement batches

use crate::domain::measurement::MeasurementBatch;
use crate::infra::error::ErrorKind;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// The two downstream targets of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Database,
    Broker,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Database => "database",
            SinkKind::Broker => "broker",
        }
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery failures. Logged by the dispatcher, never propagated further.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),

    #[error("broker connection lost before all acknowledgements arrived ({acked}/{expected})")]
    AckChannelClosed { acked: usize, expected: usize },

    #[error("{topics} topics configured for {groups} field groups")]
    TopicMismatch { topics: usize, groups: usize },

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink worker is gone")]
    WorkerGone,
}

impl SinkError {
    /// Every delivery failure is handled per cycle and never ends the daemon
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SinkFailure
    }
}

/// A downstream consumer of one batch per cycle.
///
/// Each sink owns its own connection and is driven by exactly one task.
#[async_trait]
pub trait Sink: Send {
    fn kind(&self) -> SinkKind;

    async fn deliver(&mut self, batch: &MeasurementBatch) -> Result<(), SinkError>;

    /// Release the connection. Called once, after the last delivery.
    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_errors_never_exit() {
        let errors = [
            SinkError::Timeout(Duration::from_secs(5)),
            SinkError::AckChannelClosed { acked: 2, expected: 5 },
            SinkError::WorkerGone,
        ];
        for e in &errors {
            assert_eq!(e.kind(), ErrorKind::SinkFailure);
            assert_eq!(e.kind().exit_code(), None);
        }
    }
}
