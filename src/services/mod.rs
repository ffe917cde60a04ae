//! Services - acquisition and delivery logic
//!
//! - `acquisition` - Sensor bring-up and the sample/build/dispatch cycle
//! - `dispatcher` - Concurrent per-cycle delivery to the sinks
//! - `calibration` - Interactive calibration and profile persistence

pub mod acquisition;
pub mod calibration;
pub mod dispatcher;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use acquisition::{AcquisitionLoop, LoopReport, LoopState, Termination, Timing};
pub use dispatcher::{DispatchOutcome, Dispatcher};
