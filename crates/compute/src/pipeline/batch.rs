//! One-shot detection over a fixed range, without watermarks.

use std::time::Duration;

use tracing::{info, warn};

use flowcast_core::TimeRange;
use flowcast_storage::SeriesStore;

use crate::algorithms::ForecastModel;
use crate::error::{bounded, PipelineError};

use super::detector::Detector;
use super::summary::AnomalySummary;
use super::VariableOutcome;

#[derive(Debug, Default)]
pub struct DetectRun {
    pub outcomes: Vec<(String, VariableOutcome)>,
    pub summary: AnomalySummary,
}

impl DetectRun {
    /// No variable was skipped or failed.
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| {
            matches!(o, VariableOutcome::Processed { .. } | VariableOutcome::Empty)
        })
    }
}

/// Fetch, score and write every variable's observations in `range`.
/// Failures are isolated per variable.
pub async fn detect_once<M: ForecastModel>(
    series: &dyn SeriesStore,
    detector: &Detector<M>,
    variables: &[String],
    range: TimeRange,
    timeout: Duration,
) -> DetectRun {
    let mut run = DetectRun::default();
    for variable in variables {
        let outcome = match detect_variable(series, detector, variable, range, timeout, &mut run.summary).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(variable = %variable, kind = e.kind(), error = %e, "detection failed");
                VariableOutcome::from_error(e)
            }
        };
        run.outcomes.push((variable.clone(), outcome));
    }
    info!(
        variables = variables.len(),
        points = run.summary.total_points(),
        anomalies = run.summary.total_anomalies(),
        "detection run complete"
    );
    run
}

async fn detect_variable<M: ForecastModel>(
    series: &dyn SeriesStore,
    detector: &Detector<M>,
    variable: &str,
    range: TimeRange,
    timeout: Duration,
    summary: &mut AnomalySummary,
) -> Result<VariableOutcome, PipelineError> {
    let observations = bounded(timeout, "fetch", series.fetch(variable, range)).await?;
    let results = detector.detect(variable, observations).await?;
    let Some(through) = results.last().map(|r| r.timestamp) else {
        return Ok(VariableOutcome::Empty);
    };
    let written = bounded(timeout, "write results", series.write_results(&results)).await?;
    summary.record(&results);
    Ok(VariableOutcome::Processed {
        rows: results.len(),
        written,
        anomalies: results.iter().filter(|r| r.is_anomaly).count(),
        through,
    })
}
