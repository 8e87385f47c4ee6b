use std::time::Duration;

use serde::Serialize;

use crate::pipeline::VariableOutcome;

/// Where a variable is in its detection cycle.
///
/// `Idle -> Fetching -> Detecting -> Writing -> Idle`; any step may fall to
/// `Error`, which returns to `Idle` once the failure is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Fetching,
    Detecting,
    Writing,
    Error,
}

/// Result of one worker tick.
#[derive(Debug, Default)]
pub struct TickSummary {
    pub tick: u64,
    pub outcomes: Vec<(String, VariableOutcome)>,
    /// Set when the tick could not start (variable discovery or watermark
    /// load failed). No variable was attempted.
    pub error: Option<String>,
    pub duration: Duration,
}

impl TickSummary {
    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, VariableOutcome::Processed { .. }))
    }

    pub fn empty(&self) -> usize {
        self.count(|o| matches!(o, VariableOutcome::Empty))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, VariableOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, VariableOutcome::Failed(_)))
    }

    pub fn rows_written(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                VariableOutcome::Processed { written, .. } => *written,
                _ => 0,
            })
            .sum()
    }

    pub fn anomalies(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                VariableOutcome::Processed { anomalies, .. } => *anomalies,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome(&self, variable: &str) -> Option<&VariableOutcome> {
        self.outcomes
            .iter()
            .find(|(v, _)| v == variable)
            .map(|(_, o)| o)
    }

    fn count(&self, pred: impl Fn(&VariableOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}
