use std::collections::BTreeMap;

use serde::Serialize;

use flowcast_core::AnomalyResult;

/// Detection totals for one variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSummary {
    pub variable: String,
    pub points: usize,
    pub anomalies: usize,
    pub max_score: f64,
}

impl VariableSummary {
    pub fn anomaly_rate(&self) -> f64 {
        if self.points == 0 {
            0.0
        } else {
            self.anomalies as f64 / self.points as f64
        }
    }
}

/// Accumulates per-variable totals across detection batches.
#[derive(Debug, Default)]
pub struct AnomalySummary {
    by_variable: BTreeMap<String, VariableSummary>,
}

impl AnomalySummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, results: &[AnomalyResult]) {
        for r in results {
            let entry = self
                .by_variable
                .entry(r.variable.clone())
                .or_insert_with(|| VariableSummary {
                    variable: r.variable.clone(),
                    points: 0,
                    anomalies: 0,
                    max_score: 0.0,
                });
            entry.points += 1;
            if r.is_anomaly {
                entry.anomalies += 1;
            }
            entry.max_score = entry.max_score.max(r.anomaly_score);
        }
    }

    pub fn total_points(&self) -> usize {
        self.by_variable.values().map(|s| s.points).sum()
    }

    pub fn total_anomalies(&self) -> usize {
        self.by_variable.values().map(|s| s.anomalies).sum()
    }

    /// Variables ordered by anomaly count, most first. Ties by name.
    pub fn top(&self, n: usize) -> Vec<&VariableSummary> {
        let mut all: Vec<&VariableSummary> = self.by_variable.values().collect();
        all.sort_by(|a, b| b.anomalies.cmp(&a.anomalies).then_with(|| a.variable.cmp(&b.variable)));
        all.truncate(n);
        all
    }
}
