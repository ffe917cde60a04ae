//! Error taxonomy and process exit codes

use crate::infra::config::ConfigError;
use crate::io::sensor::SensorError;
use thiserror::Error;

/// Exit status after an operator interrupt
pub const EXIT_OK: u8 = 0;
/// Exit status for init, connectivity and configuration failures
pub const EXIT_INIT_FAILURE: u8 = 1;
/// Exit status for a sensor read failure during sampling
pub const EXIT_RUNTIME_FAILURE: u8 = 2;

/// Failure classes of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Sensor bring-up or startup connectivity failed
    FatalInit,
    /// A vector read failed while sampling
    FatalRuntime,
    /// A sink delivery failed. Handled locally, never terminates.
    SinkFailure,
    /// Configuration could not be read or is invalid
    ConfigFailure,
}

impl ErrorKind {
    /// Process exit status for this kind, `None` if it never ends the process
    pub fn exit_code(&self) -> Option<u8> {
        match self {
            ErrorKind::FatalInit | ErrorKind::ConfigFailure => Some(EXIT_INIT_FAILURE),
            ErrorKind::FatalRuntime => Some(EXIT_RUNTIME_FAILURE),
            ErrorKind::SinkFailure => None,
        }
    }
}

/// Errors that terminate the daemon
#[derive(Debug, Error)]
pub enum AppError {
    #[error("sensor initialization failed: {0}")]
    SensorInit(#[source] SensorError),

    #[error("sensor read failed: {0}")]
    SensorRead(#[source] SensorError),

    #[error("database at {url} unreachable: {message}")]
    Connectivity { url: String, message: String },

    #[error("failed to set up {sink} sink: {message}")]
    SinkSetup { sink: &'static str, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::SensorInit(_) | AppError::Connectivity { .. } | AppError::SinkSetup { .. } => {
                ErrorKind::FatalInit
            }
            AppError::SensorRead(_) => ErrorKind::FatalRuntime,
            AppError::Config(_) => ErrorKind::ConfigFailure,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code().unwrap_or(EXIT_INIT_FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let init = AppError::SensorInit(SensorError::Bus("nack".to_string()));
        let read = AppError::SensorRead(SensorError::Bus("nack".to_string()));
        let conn = AppError::Connectivity {
            url: "http://localhost:8086/ping".to_string(),
            message: "refused".to_string(),
        };
        let config = AppError::Config(ConfigError::Invalid("updaterate must be > 0".to_string()));

        assert_eq!(init.exit_code(), EXIT_INIT_FAILURE);
        assert_eq!(conn.exit_code(), EXIT_INIT_FAILURE);
        assert_eq!(config.exit_code(), EXIT_INIT_FAILURE);
        assert_eq!(read.exit_code(), EXIT_RUNTIME_FAILURE);
        assert_eq!(read.kind(), ErrorKind::FatalRuntime);
        assert_eq!(config.kind(), ErrorKind::ConfigFailure);
    }
}
