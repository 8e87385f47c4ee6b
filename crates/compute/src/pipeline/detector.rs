use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use flowcast_core::config::AnomalyConfig;
use flowcast_core::{AnomalyResult, Observation};
use flowcast_storage::ModelStore;

use crate::algorithms::{ForecastError, ForecastModel, ForecastPoint};
use crate::error::PipelineError;

use super::artifact::load_model;
use super::sort_dedup;

/// Largest reported anomaly score.
pub const MAX_ANOMALY_SCORE: f64 = 99.99;
/// Largest reported relative prediction error, in percent.
pub const MAX_ERROR_PCT: f64 = 999.99;
/// Floor for divisors so zero spread or zero values never divide by zero.
const MIN_DIVISOR: f64 = 1e-9;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Scores observations against the saved model for their variable.
pub struct Detector<M: ForecastModel> {
    models: Arc<dyn ModelStore>,
    threshold: f64,
    store_timeout: Duration,
    _model: PhantomData<fn() -> M>,
}

impl<M: ForecastModel> Detector<M> {
    pub fn new(models: Arc<dyn ModelStore>, config: &AnomalyConfig) -> Self {
        Self {
            models,
            threshold: config.anomaly_threshold,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            _model: PhantomData,
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Load the model for `variable` and score `observations`.
    ///
    /// One result per distinct finite observation, ordered by timestamp.
    /// Non-finite values are dropped with a warning. A batch with nothing
    /// left to score returns no rows without touching the model store.
    pub async fn detect(
        &self,
        variable: &str,
        observations: Vec<Observation>,
    ) -> Result<Vec<AnomalyResult>, PipelineError> {
        let batch = prepare_batch(variable, observations)?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let artifact = load_model::<M>(&*self.models, variable, self.store_timeout).await?;
        self.score_batch(variable, &artifact.model, &batch)
    }

    /// Score against an already loaded model.
    pub fn detect_with_model(
        &self,
        variable: &str,
        model: &M,
        observations: Vec<Observation>,
    ) -> Result<Vec<AnomalyResult>, PipelineError> {
        let batch = prepare_batch(variable, observations)?;
        self.score_batch(variable, model, &batch)
    }

    fn score_batch(
        &self,
        variable: &str,
        model: &M,
        batch: &[Observation],
    ) -> Result<Vec<AnomalyResult>, PipelineError> {
        let timestamps: Vec<DateTime<Utc>> = batch.iter().map(|o| o.timestamp).collect();
        let forecast = model.forecast(&timestamps);
        if forecast.len() != batch.len() {
            return Err(PipelineError::Forecast {
                variable: variable.to_string(),
                source: ForecastError::PointCount {
                    expected: batch.len(),
                    got: forecast.len(),
                },
            });
        }
        let residual_std = model.residual_std();
        let processed_at = Utc::now();

        let results: Vec<AnomalyResult> = batch
            .iter()
            .zip(&forecast)
            .map(|(obs, point)| score_point(obs, point, residual_std, self.threshold, processed_at))
            .collect();
        debug!(
            rows = results.len(),
            anomalies = results.iter().filter(|r| r.is_anomaly).count(),
            "batch scored"
        );
        Ok(results)
    }
}

/// Validate, drop non-finite values, sort and de-duplicate a raw batch.
fn prepare_batch(
    variable: &str,
    observations: Vec<Observation>,
) -> Result<Vec<Observation>, PipelineError> {
    if let Some(o) = observations.iter().find(|o| o.variable != variable) {
        return Err(PipelineError::InvalidObservation {
            variable: variable.to_string(),
            reason: format!("batch contains an observation of '{}'", o.variable),
        });
    }

    let total = observations.len();
    let finite: Vec<Observation> = observations
        .into_iter()
        .filter(|o| o.value.is_finite())
        .collect();
    let dropped = total - finite.len();
    if dropped > 0 {
        warn!(variable, dropped, "dropping non-finite observations");
    }
    Ok(sort_dedup(finite))
}

/// Score one observation against its forecast.
pub fn score_point(
    obs: &Observation,
    point: &ForecastPoint,
    residual_std: f64,
    threshold: f64,
    processed_at: DateTime<Utc>,
) -> AnomalyResult {
    let residual = obs.value - point.yhat;
    let outside_interval = obs.value < point.yhat_lower || obs.value > point.yhat_upper;
    let high_residual = residual.abs() > threshold * residual_std;
    let anomaly_score =
        (residual.abs() / residual_std.max(MIN_DIVISOR) * 10.0).min(MAX_ANOMALY_SCORE);
    let prediction_error_pct =
        (residual.abs() / obs.value.abs().max(MIN_DIVISOR) * 100.0).min(MAX_ERROR_PCT);

    AnomalyResult {
        timestamp: obs.timestamp,
        value: obs.value,
        yhat: point.yhat,
        yhat_lower: point.yhat_lower,
        yhat_upper: point.yhat_upper,
        residual,
        outside_interval,
        high_residual,
        is_anomaly: outside_interval || high_residual,
        anomaly_score,
        variable: obs.variable.clone(),
        prediction_error_pct,
        source: obs.source.clone(),
        processed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde::{Deserialize, Serialize};

    /// Fixed forecast of 10 +/- 2 with residual spread 1.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Fixed;

    impl ForecastModel for Fixed {
        fn forecast(&self, timestamps: &[DateTime<Utc>]) -> Vec<ForecastPoint> {
            timestamps
                .iter()
                .map(|&timestamp| ForecastPoint {
                    timestamp,
                    yhat: 10.0,
                    yhat_lower: 8.0,
                    yhat_upper: 12.0,
                })
                .collect()
        }

        fn residual_std(&self) -> f64 {
            1.0
        }
    }

    fn t(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, m, 0).unwrap()
    }

    fn detector() -> Detector<Fixed> {
        let dir = std::env::temp_dir();
        let models: Arc<dyn ModelStore> =
            Arc::new(flowcast_storage::FileModelStore::new(dir).unwrap());
        Detector::new(models, &AnomalyConfig::default())
    }

    fn point(yhat: f64, lower: f64, upper: f64) -> ForecastPoint {
        ForecastPoint {
            timestamp: t(0),
            yhat,
            yhat_lower: lower,
            yhat_upper: upper,
        }
    }

    #[test]
    fn residual_inside_interval_but_high() {
        // Interval is wide but the residual is three standard deviations.
        let obs = Observation::new("TEMP", t(0), 13.0, "s");
        let r = score_point(&obs, &point(10.0, 5.0, 15.0), 1.0, 2.0, t(1));
        assert_eq!(r.residual, 3.0);
        assert!(!r.outside_interval);
        assert!(r.high_residual);
        assert!(r.is_anomaly);
        assert!((r.anomaly_score - 30.0).abs() < 1e-9);
    }

    #[test]
    fn quiet_point_is_not_anomalous() {
        let obs = Observation::new("TEMP", t(0), 10.5, "s");
        let r = score_point(&obs, &point(10.0, 8.0, 12.0), 1.0, 2.0, t(1));
        assert!(!r.is_anomaly);
        assert!((r.prediction_error_pct - 100.0 * 0.5 / 10.5).abs() < 1e-9);
    }

    #[test]
    fn scores_are_clipped() {
        let obs = Observation::new("TEMP", t(0), 0.0, "s");
        let r = score_point(&obs, &point(1000.0, 999.0, 1001.0), 0.0, 2.0, t(1));
        assert_eq!(r.anomaly_score, MAX_ANOMALY_SCORE);
        assert_eq!(r.prediction_error_pct, MAX_ERROR_PCT);
        assert!(r.outside_interval);
    }

    #[test]
    fn one_row_per_distinct_timestamp() {
        let d = detector();
        let rows = d
            .detect_with_model(
                "TEMP",
                &Fixed,
                vec![
                    Observation::new("TEMP", t(2), 10.0, "s"),
                    Observation::new("TEMP", t(1), 11.0, "s"),
                    Observation::new("TEMP", t(2), 20.0, "s"),
                ],
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, t(1));
        assert_eq!(rows[1].value, 20.0);
        assert!(rows[1].is_anomaly);
        for r in &rows {
            assert_eq!(r.residual, r.value - r.yhat);
        }
    }

    #[test]
    fn non_finite_values_are_dropped() {
        let rows = detector()
            .detect_with_model(
                "TEMP",
                &Fixed,
                vec![
                    Observation::new("TEMP", t(1), 11.0, "s"),
                    Observation::new("TEMP", t(2), f64::INFINITY, "s"),
                    Observation::new("TEMP", t(3), f64::NAN, "s"),
                ],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, t(1));
    }

    #[tokio::test]
    async fn all_non_finite_batch_needs_no_model() {
        let rows = detector()
            .detect("no-such-variable", vec![Observation::new("no-such-variable", t(1), f64::NAN, "s")])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    /// Returns one point fewer than asked for.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Short;

    impl ForecastModel for Short {
        fn forecast(&self, timestamps: &[DateTime<Utc>]) -> Vec<ForecastPoint> {
            let mut points = Fixed.forecast(timestamps);
            points.pop();
            points
        }

        fn residual_std(&self) -> f64 {
            1.0
        }
    }

    #[test]
    fn short_forecast_is_an_error() {
        let models: Arc<dyn ModelStore> =
            Arc::new(flowcast_storage::FileModelStore::new(std::env::temp_dir()).unwrap());
        let d: Detector<Short> = Detector::new(models, &AnomalyConfig::default());
        let err = d
            .detect_with_model(
                "TEMP",
                &Short,
                vec![
                    Observation::new("TEMP", t(1), 11.0, "s"),
                    Observation::new("TEMP", t(2), 12.0, "s"),
                ],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Forecast {
                source: ForecastError::PointCount { expected: 2, got: 1 },
                ..
            }
        ));
    }

    #[test]
    fn foreign_variable_is_rejected() {
        let err = detector()
            .detect_with_model("TEMP", &Fixed, vec![Observation::new("FLOW", t(1), 1.0, "s")])
            .unwrap_err();
        assert!(err.to_string().contains("FLOW"));
    }

    #[tokio::test]
    async fn empty_batch_needs_no_model() {
        let rows = detector().detect("no-such-variable", Vec::new()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn missing_model_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let models: Arc<dyn ModelStore> =
            Arc::new(flowcast_storage::FileModelStore::new(dir.path()).unwrap());
        let d: Detector<Fixed> = Detector::new(models, &AnomalyConfig::default());
        let err = d
            .detect("TEMP", vec![Observation::new("TEMP", t(1), 1.0, "s")])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelNotFound(_)));
    }
}
