use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::types::TickSummary;

/// Cumulative worker statistics across ticks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerMetrics {
    pub ticks: u64,
    /// Ticks that could not start at all.
    pub ticks_failed: u64,
    pub variables_processed: u64,
    pub variables_skipped: u64,
    pub variables_failed: u64,
    pub rows_written: u64,
    pub anomalies: u64,
    pub avg_tick_duration: Duration,
    pub last_tick: Option<DateTime<Utc>>,
}

impl WorkerMetrics {
    /// Fold a finished tick into the totals.
    pub fn record_tick(&mut self, summary: &TickSummary) {
        self.ticks += 1;
        if summary.error.is_some() {
            self.ticks_failed += 1;
        }
        self.variables_processed += summary.processed() as u64;
        self.variables_skipped += summary.skipped() as u64;
        self.variables_failed += summary.failed() as u64;
        self.rows_written += summary.rows_written();
        self.anomalies += summary.anomalies() as u64;
        self.last_tick = Some(Utc::now());

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_tick_duration = if self.ticks == 1 {
            summary.duration
        } else {
            let prev = self.avg_tick_duration.as_nanos() as f64;
            let cur = summary.duration.as_nanos() as f64;
            Duration::from_nanos((prev + (cur - prev) / self.ticks as f64) as u64)
        };
    }

    pub fn anomaly_rate(&self) -> f64 {
        if self.rows_written == 0 {
            0.0
        } else {
            self.anomalies as f64 / self.rows_written as f64
        }
    }

    pub fn log(&self, label: &str) {
        info!(
            ticks = self.ticks,
            ticks_failed = self.ticks_failed,
            processed = self.variables_processed,
            skipped = self.variables_skipped,
            failed = self.variables_failed,
            rows_written = self.rows_written,
            anomalies = self.anomalies,
            anomaly_pct = self.anomaly_rate() * 100.0,
            avg_tick_ms = self.avg_tick_duration.as_millis() as u64,
            "{}",
            label
        );
    }
}
