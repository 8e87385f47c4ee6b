use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::algorithms::ForecastModel;
use crate::error::{bounded, PipelineError};
use crate::scheduler::metrics::WorkerMetrics;
use crate::scheduler::types::TickSummary;

use super::Worker;

/// Cumulative stats are logged every this many ticks.
const STATS_EVERY: u64 = 10;

impl<M: ForecastModel> Worker<M> {
    /// Tick until `shutdown` turns true or its sender is dropped.
    ///
    /// The first tick runs immediately. A running tick is never cut short:
    /// shutdown is only observed between ticks. Returns the final metrics.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerMetrics {
        info!(
            "Worker starting, tick interval {:?}",
            self.config.tick_interval()
        );
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let metrics = self.metrics();
        metrics.log("Worker stopped");
        metrics
    }

    /// Run one pass over every known variable.
    pub async fn tick(&self) -> TickSummary {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let start = Instant::now();
        let mut summary = TickSummary {
            tick,
            ..TickSummary::default()
        };

        match self.prepare_tick().await {
            Ok(variables) => {
                debug!(tick, variables = variables.len(), "tick started");
                for variable in variables {
                    let outcome = self.process_variable(&variable).await;
                    summary.outcomes.push((variable, outcome));
                }
            }
            Err(e) => {
                error!(tick, error = %e, "tick could not start");
                summary.error = Some(e.to_string());
            }
        }
        summary.duration = start.elapsed();

        info!(
            tick,
            processed = summary.processed(),
            empty = summary.empty(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            rows_written = summary.rows_written(),
            anomalies = summary.anomalies(),
            duration_ms = summary.duration.as_millis() as u64,
            "tick complete"
        );

        let snapshot = match self.metrics.write() {
            Ok(mut m) => {
                m.record_tick(&summary);
                Some(m.clone())
            }
            Err(_) => None,
        };
        if let Some(m) = snapshot {
            if tick % STATS_EVERY == 0 {
                m.log("Worker stats");
            }
        }
        summary
    }

    /// Load watermarks on first use and list the variables to visit: every
    /// variable with a saved model plus every variable in the input table.
    async fn prepare_tick(&self) -> Result<Vec<String>, PipelineError> {
        let timeout = self.config.store_timeout();
        {
            let mut marks = self.marks.lock().await;
            if marks.is_none() {
                let loaded = bounded(timeout, "watermark load", self.watermarks.load()).await?;
                info!(variables = loaded.len(), "watermarks loaded");
                *marks = Some(loaded);
            }
        }

        let mut variables: BTreeSet<String> =
            bounded(timeout, "model list", self.models.list()).await?.into_iter().collect();
        variables.extend(bounded(timeout, "variable list", self.series.variables()).await?);
        Ok(variables.into_iter().collect())
    }
}
