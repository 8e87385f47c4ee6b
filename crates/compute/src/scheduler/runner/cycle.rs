use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use flowcast_core::TimeRange;

use crate::algorithms::ForecastModel;
use crate::error::{bounded, PipelineError};
use crate::pipeline::VariableOutcome;
use crate::scheduler::types::CycleState;

use super::Worker;

impl<M: ForecastModel> Worker<M> {
    /// One `Idle -> Fetching -> Detecting -> Writing -> Idle` cycle. A
    /// failure passes through `Error` and is back at `Idle` when this returns.
    pub(super) async fn process_variable(&self, variable: &str) -> VariableOutcome {
        match self.run_cycle(variable).await {
            Ok(outcome) => {
                self.set_state(variable, CycleState::Idle);
                outcome
            }
            Err(e) if e.is_skip() => {
                debug!(variable, reason = %e, "variable skipped");
                self.set_state(variable, CycleState::Idle);
                VariableOutcome::from_error(e)
            }
            Err(e) => {
                self.set_state(variable, CycleState::Error);
                if e.is_recoverable() {
                    warn!(variable, kind = e.kind(), error = %e, "variable failed, retrying next tick");
                } else {
                    error!(variable, kind = e.kind(), error = %e, "variable failed");
                }
                self.set_state(variable, CycleState::Idle);
                VariableOutcome::from_error(e)
            }
        }
    }

    async fn run_cycle(&self, variable: &str) -> Result<VariableOutcome, PipelineError> {
        let timeout = self.config.store_timeout();

        self.set_state(variable, CycleState::Fetching);
        let since = self.cursor(variable).await?;
        let observations =
            bounded(timeout, "fetch", self.series.fetch(variable, TimeRange::after(since))).await?;
        // Dropped non-finite rows still count towards the watermark.
        let Some(through) = observations.iter().map(|o| o.timestamp).max() else {
            return Ok(VariableOutcome::Empty);
        };

        self.set_state(variable, CycleState::Detecting);
        let results = self.detector.detect(variable, observations).await?;
        let anomalies = results.iter().filter(|r| r.is_anomaly).count();

        self.set_state(variable, CycleState::Writing);
        let written = if results.is_empty() {
            0
        } else {
            bounded(timeout, "write results", self.series.write_results(&results)).await?
        };
        // The watermark only moves once results are durable. If the commit
        // fails the batch is fetched again next tick and the idempotent
        // write makes that harmless.
        bounded(timeout, "watermark commit", self.watermarks.commit(variable, through)).await?;
        if let Some(marks) = self.marks.lock().await.as_mut() {
            marks.insert(variable.to_string(), through);
        }

        info!(
            variable,
            rows = results.len(),
            written,
            anomalies,
            watermark = %through,
            "variable processed"
        );
        Ok(VariableOutcome::Processed {
            rows: results.len(),
            written,
            anomalies,
            through,
        })
    }

    /// Lower bound (exclusive) for the next fetch. A variable without a
    /// watermark starts after its newest stored result, or `initial_lookback`
    /// before now when it has none.
    async fn cursor(&self, variable: &str) -> Result<DateTime<Utc>, PipelineError> {
        if let Some(ts) = self.watermark(variable).await {
            return Ok(ts);
        }

        let latest = bounded(
            self.config.store_timeout(),
            "latest result",
            self.series.latest_result(variable),
        )
        .await?;
        let start = match latest {
            Some(ts) => ts,
            None => Utc::now() - self.config.initial_lookback(),
        };
        debug!(variable, start = %start, from_results = latest.is_some(), "initial watermark");

        if let Some(marks) = self.marks.lock().await.as_mut() {
            marks.insert(variable.to_string(), start);
        }
        Ok(start)
    }
}
