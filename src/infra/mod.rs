//! Infrastructure - configuration, errors, logging and metrics
//!
//! - `config` - Application configuration (JSON/TOML loading, validation)
//! - `error` - Error kinds and exit codes
//! - `logging` - tracing subscriber setup
//! - `metrics` - Lock-free metrics collection

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use error::{AppError, ErrorKind};
pub use metrics::Metrics;
