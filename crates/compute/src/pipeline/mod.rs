//! Model lifecycle and scoring: train per-variable models, score new
//! observations against them, and summarise what was found.

pub mod artifact;
pub mod batch;
pub mod detector;
pub mod summary;
pub mod trainer;

pub use artifact::{load_model, save_model, ModelArtifact, FORMAT_VERSION};
pub use batch::{detect_once, DetectRun};
pub use detector::{score_point, Detector};
pub use summary::{AnomalySummary, VariableSummary};
pub use trainer::{Trainer, TrainingOutcome, TrainingReport};

use chrono::{DateTime, Utc};
use tracing::debug;

use flowcast_core::Observation;

use crate::error::PipelineError;

/// Outcome of running one variable through detection.
#[derive(Debug)]
pub enum VariableOutcome {
    /// Results were written; `through` is the newest scored timestamp.
    Processed {
        rows: usize,
        written: u64,
        anomalies: usize,
        through: DateTime<Utc>,
    },
    /// Nothing new to score.
    Empty,
    Skipped(PipelineError),
    Failed(PipelineError),
}

impl VariableOutcome {
    pub fn from_error(e: PipelineError) -> Self {
        if e.is_skip() {
            VariableOutcome::Skipped(e)
        } else {
            VariableOutcome::Failed(e)
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VariableOutcome::Processed { .. } => "processed",
            VariableOutcome::Empty => "empty",
            VariableOutcome::Skipped(_) => "skipped",
            VariableOutcome::Failed(_) => "failed",
        }
    }
}

/// Sort by timestamp and collapse duplicate timestamps, keeping the one
/// that came last in input order.
pub(crate) fn sort_dedup(mut observations: Vec<Observation>) -> Vec<Observation> {
    observations.sort_by_key(|o| o.timestamp);
    let before = observations.len();
    let mut out: Vec<Observation> = Vec::with_capacity(before);
    for o in observations {
        match out.last_mut() {
            Some(last) if last.timestamp == o.timestamp => *last = o,
            _ => out.push(o),
        }
    }
    if out.len() < before {
        debug!(duplicates = before - out.len(), "collapsed duplicate timestamps");
    }
    out
}
