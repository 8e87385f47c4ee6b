//! Continuous worker: periodically applies the detector to observations
//! newer than each variable's watermark.
//!
//! Ticks are serialised by the run loop. Within a tick variables are
//! processed one after another and a failure in one never stops the others.

pub mod metrics;
pub mod runner;
pub mod types;

pub use metrics::WorkerMetrics;
pub use runner::Worker;
pub use types::{CycleState, TickSummary};
