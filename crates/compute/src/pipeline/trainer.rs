use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use flowcast_core::config::AnomalyConfig;
use flowcast_core::{Observation, TimeRange};
use flowcast_storage::{ModelStore, SeriesStore};

use crate::algorithms::Forecaster;
use crate::error::{bounded, PipelineError};

use super::artifact::{save_model, ModelArtifact};
use super::sort_dedup;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Fits one model per variable and persists it.
pub struct Trainer<F: Forecaster> {
    forecaster: Arc<F>,
    models: Arc<dyn ModelStore>,
    min_points: usize,
    store_timeout: Duration,
}

#[derive(Debug)]
pub enum TrainingOutcome {
    Trained { points: usize },
    Skipped(PipelineError),
    Failed(PipelineError),
}

impl TrainingOutcome {
    fn from_error(e: PipelineError) -> Self {
        if e.is_skip() {
            TrainingOutcome::Skipped(e)
        } else {
            TrainingOutcome::Failed(e)
        }
    }
}

#[derive(Debug, Default)]
pub struct TrainingReport {
    pub outcomes: Vec<(String, TrainingOutcome)>,
    pub duration: Duration,
}

impl TrainingReport {
    pub fn trained(&self) -> usize {
        self.count(|o| matches!(o, TrainingOutcome::Trained { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TrainingOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TrainingOutcome::Failed(_)))
    }

    /// Every requested variable got a model.
    pub fn is_clean(&self) -> bool {
        self.trained() == self.outcomes.len()
    }

    fn count(&self, pred: impl Fn(&TrainingOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

impl<F: Forecaster> Trainer<F> {
    pub fn new(forecaster: F, models: Arc<dyn ModelStore>, config: &AnomalyConfig) -> Self {
        Self {
            forecaster: Arc::new(forecaster),
            models,
            min_points: config.min_training_points,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Fit without saving.
    pub fn fit(
        &self,
        variable: &str,
        history: Vec<Observation>,
    ) -> Result<ModelArtifact<F::Model>, PipelineError> {
        fit_history(&*self.forecaster, variable, history, self.min_points)
    }

    /// Fit and save. Nothing is saved when fitting fails.
    pub async fn train(
        &self,
        variable: &str,
        history: Vec<Observation>,
    ) -> Result<ModelArtifact<F::Model>, PipelineError> {
        let artifact = self.fit(variable, history)?;
        save_model(&*self.models, &artifact, self.store_timeout).await?;
        info!(
            variable,
            points = artifact.training_points,
            algorithm = %artifact.algorithm,
            "model trained"
        );
        Ok(artifact)
    }

    /// Train every variable from the series store. Fetches run in order,
    /// fits run in parallel on the rayon pool, saves run in order.
    pub async fn train_all(
        &self,
        series: &dyn SeriesStore,
        variables: &[String],
        range: TimeRange,
    ) -> TrainingReport {
        let start = Instant::now();
        let mut report = TrainingReport::default();
        let mut histories = Vec::with_capacity(variables.len());

        for variable in variables {
            match bounded(self.store_timeout, "fetch", series.fetch(variable, range)).await {
                Ok(history) => histories.push((variable.clone(), history)),
                Err(e) => {
                    warn!(variable = %variable, error = %e, "history fetch failed");
                    report
                        .outcomes
                        .push((variable.clone(), TrainingOutcome::from_error(e)));
                }
            }
        }

        let forecaster = Arc::clone(&self.forecaster);
        let min_points = self.min_points;
        let handle = tokio::task::spawn_blocking(move || {
            histories
                .into_par_iter()
                .map(|(variable, history)| {
                    let fitted = fit_history(&*forecaster, &variable, history, min_points);
                    (variable, fitted)
                })
                .collect::<Vec<_>>()
        });
        let fitted = match handle.await {
            Ok(fitted) => fitted,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!(error = %e, "fit task cancelled");
                report.duration = start.elapsed();
                return report;
            }
        };

        for (variable, fitted) in fitted {
            let outcome = match fitted {
                Ok(artifact) => match save_model(&*self.models, &artifact, self.store_timeout).await {
                    Ok(()) => {
                        debug!(variable = %variable, points = artifact.training_points, "model saved");
                        TrainingOutcome::Trained {
                            points: artifact.training_points,
                        }
                    }
                    Err(e) => TrainingOutcome::from_error(e),
                },
                Err(e) => TrainingOutcome::from_error(e),
            };
            match &outcome {
                TrainingOutcome::Trained { .. } => {}
                TrainingOutcome::Skipped(e) => info!(variable = %variable, reason = %e, "training skipped"),
                TrainingOutcome::Failed(e) => warn!(variable = %variable, error = %e, "training failed"),
            }
            report.outcomes.push((variable, outcome));
        }

        report.outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        report.duration = start.elapsed();
        info!(
            trained = report.trained(),
            skipped = report.skipped(),
            failed = report.failed(),
            duration_ms = report.duration.as_millis() as u64,
            "training run complete"
        );
        report
    }
}

/// Clean a raw history and fit it. Non-finite values are dropped before the
/// minimum-points check.
fn fit_history<F: Forecaster>(
    forecaster: &F,
    variable: &str,
    history: Vec<Observation>,
    min_points: usize,
) -> Result<ModelArtifact<F::Model>, PipelineError> {
    let raw = history.len();
    let finite: Vec<Observation> = history.into_iter().filter(|o| o.value.is_finite()).collect();
    if finite.len() < raw {
        debug!(variable, dropped = raw - finite.len(), "dropped non-finite training values");
    }

    let series: Vec<_> = sort_dedup(finite)
        .into_iter()
        .map(|o| (o.timestamp, o.value))
        .collect();
    if series.len() < min_points {
        return Err(PipelineError::InsufficientData {
            variable: variable.to_string(),
            points: series.len(),
            required: min_points,
        });
    }

    let model = forecaster
        .fit(&series)
        .map_err(|source| PipelineError::Forecast {
            variable: variable.to_string(),
            source,
        })?;
    Ok(ModelArtifact::new(variable, forecaster.name(), series.len(), model))
}
