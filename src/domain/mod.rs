//! Domain models - sensor readings and measurement batches
//!
//! - `types` - vectors, euler angles, calibration state
//! - `measurement` - field groups, batches and the batch builder

pub mod measurement;
pub mod types;

pub use measurement::{build_batch, FieldGroup, FieldGroupKind, MeasurementBatch, SensorSnapshot};
pub use types::{EulerAngles, OrientationLayout, Vector3, VectorKind};
