use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use flowcast_core::config::{AnomalyConfig, WorkerConfig};
use flowcast_core::{AnomalyResult, Observation, TimeRange};
use flowcast_storage::{
    FileModelStore, MemorySeriesStore, MemoryWatermarkStore, ModelStore, SeriesStore,
    StorageError, WatermarkStore,
};

use crate::algorithms::{ForecastModel, ForecastPoint};
use crate::pipeline::{save_model, ModelArtifact, VariableOutcome};
use crate::scheduler::runner::Worker;
use crate::scheduler::types::CycleState;

/// Always forecasts 20 +/- 2 with residual spread 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Flat;

impl ForecastModel for Flat {
    fn forecast(&self, timestamps: &[DateTime<Utc>]) -> Vec<ForecastPoint> {
        timestamps
            .iter()
            .map(|&timestamp| ForecastPoint {
                timestamp,
                yhat: 20.0,
                yhat_lower: 18.0,
                yhat_upper: 22.0,
            })
            .collect()
    }

    fn residual_std(&self) -> f64 {
        1.0
    }
}

/// Series store whose result writes fail while `fail_writes` is set.
struct FlakySeries {
    inner: MemorySeriesStore,
    fail_writes: AtomicBool,
}

#[async_trait]
impl SeriesStore for FlakySeries {
    async fn variables(&self) -> Result<Vec<String>, StorageError> {
        self.inner.variables().await
    }

    async fn fetch(&self, variable: &str, range: TimeRange) -> Result<Vec<Observation>, StorageError> {
        self.inner.fetch(variable, range).await
    }

    async fn write_results(&self, results: &[AnomalyResult]) -> Result<u64, StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("connection reset".into()));
        }
        self.inner.write_results(results).await
    }

    async fn latest_result(&self, variable: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.inner.latest_result(variable).await
    }
}

/// Series store whose result writes take `delay` to complete.
struct SlowWrites {
    inner: MemorySeriesStore,
    delay: Duration,
}

#[async_trait]
impl SeriesStore for SlowWrites {
    async fn variables(&self) -> Result<Vec<String>, StorageError> {
        self.inner.variables().await
    }

    async fn fetch(&self, variable: &str, range: TimeRange) -> Result<Vec<Observation>, StorageError> {
        self.inner.fetch(variable, range).await
    }

    async fn write_results(&self, results: &[AnomalyResult]) -> Result<u64, StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.write_results(results).await
    }

    async fn latest_result(&self, variable: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.inner.latest_result(variable).await
    }
}

/// Watermark store that refuses every commit.
struct ReadOnlyWatermarks(MemoryWatermarkStore);

#[async_trait]
impl WatermarkStore for ReadOnlyWatermarks {
    async fn load(&self) -> Result<std::collections::BTreeMap<String, DateTime<Utc>>, StorageError> {
        self.0.load().await
    }

    async fn commit(&self, _variable: &str, _timestamp: DateTime<Utc>) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk full".into()))
    }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

async fn model_store(variables: &[&str]) -> (TempDir, Arc<dyn ModelStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ModelStore> = Arc::new(FileModelStore::new(dir.path()).unwrap());
    for v in variables {
        save_model(&*store, &ModelArtifact::new(v, "flat", 10, Flat), Duration::from_secs(5))
            .await
            .unwrap();
    }
    (dir, store)
}

fn worker(
    series: Arc<dyn SeriesStore>,
    models: Arc<dyn ModelStore>,
    watermarks: Arc<dyn WatermarkStore>,
) -> Worker<Flat> {
    Worker::new(
        WorkerConfig::default(),
        &AnomalyConfig::default(),
        series,
        models,
        watermarks,
    )
}

fn temp_series() -> MemorySeriesStore {
    let series = MemorySeriesStore::new();
    series
        .extend([
            Observation::new("TEMP", at(0, 0), 20.0, "feed"),
            Observation::new("TEMP", at(0, 30), 20.5, "feed"),
            Observation::new("TEMP", at(1, 0), 30.0, "feed"),
        ])
        .unwrap();
    series
}

#[tokio::test]
async fn tick_scores_new_observations_and_advances_watermark() {
    let series = Arc::new(temp_series());
    let marks = Arc::new(MemoryWatermarkStore::with_marks([("TEMP".to_string(), at(0, 0))]));
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = worker(series.clone(), models, marks.clone());

    let summary = w.tick().await;
    assert_eq!(summary.processed(), 1);
    assert_eq!(summary.rows_written(), 2);
    assert_eq!(summary.anomalies(), 1);
    assert_eq!(marks.get("TEMP"), Some(at(1, 0)));
    assert_eq!(w.state("TEMP"), Some(CycleState::Idle));

    let rows = series.results("TEMP").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].timestamp, at(0, 30));
    assert!(!rows[0].is_anomaly);
    assert!(rows[1].is_anomaly);

    // Nothing new: second tick is a no-op.
    let again = w.tick().await;
    assert!(matches!(again.outcome("TEMP"), Some(VariableOutcome::Empty)));
    assert_eq!(series.result_count().unwrap(), 2);
    assert_eq!(w.metrics().ticks, 2);
}

#[tokio::test]
async fn failed_write_keeps_watermark_and_retries() {
    let series = Arc::new(FlakySeries {
        inner: temp_series(),
        fail_writes: AtomicBool::new(true),
    });
    let marks = Arc::new(MemoryWatermarkStore::with_marks([("TEMP".to_string(), at(0, 0))]));
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = worker(series.clone(), models, marks.clone());

    let first = w.tick().await;
    assert_eq!(first.failed(), 1);
    assert_eq!(marks.get("TEMP"), Some(at(0, 0)));
    assert_eq!(w.state("TEMP"), Some(CycleState::Idle));

    series.fail_writes.store(false, Ordering::Relaxed);
    let second = w.tick().await;
    assert_eq!(second.rows_written(), 2);
    assert_eq!(marks.get("TEMP"), Some(at(1, 0)));
}

#[tokio::test]
async fn missing_model_does_not_block_other_variables() {
    let series = temp_series();
    series
        .insert(Observation::new("FLOW", at(0, 45), 3.0, "feed"))
        .unwrap();
    let series = Arc::new(series);
    let marks = Arc::new(MemoryWatermarkStore::with_marks([
        ("TEMP".to_string(), at(0, 0)),
        ("FLOW".to_string(), at(0, 0)),
    ]));
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = worker(series.clone(), models, marks.clone());

    let summary = w.tick().await;
    assert!(matches!(summary.outcome("FLOW"), Some(VariableOutcome::Skipped(_))));
    assert!(matches!(summary.outcome("TEMP"), Some(VariableOutcome::Processed { .. })));
    assert_eq!(marks.get("FLOW"), Some(at(0, 0)));
    assert_eq!(marks.get("TEMP"), Some(at(1, 0)));
}

#[tokio::test]
async fn unseen_variable_resumes_after_latest_result() {
    let series = Arc::new(temp_series());
    // A previous run already wrote the 00:30 row.
    let seeded = crate::pipeline::score_point(
        &Observation::new("TEMP", at(0, 30), 20.5, "feed"),
        &Flat.forecast(&[at(0, 30)])[0],
        1.0,
        2.0,
        at(0, 31),
    );
    series.write_results(&[seeded]).await.unwrap();

    let marks = Arc::new(MemoryWatermarkStore::new());
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = worker(series.clone(), models, marks.clone());

    let summary = w.tick().await;
    assert_eq!(summary.rows_written(), 1);
    assert_eq!(marks.get("TEMP"), Some(at(1, 0)));
}

#[tokio::test]
async fn unseen_variable_without_results_uses_lookback() {
    let now = Utc::now();
    let series = MemorySeriesStore::new();
    series
        .extend([
            Observation::new("TEMP", now - chrono::Duration::hours(48), 20.0, "feed"),
            Observation::new("TEMP", now - chrono::Duration::hours(1), 20.0, "feed"),
        ])
        .unwrap();
    let series = Arc::new(series);
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = worker(series.clone(), models, Arc::new(MemoryWatermarkStore::new()));

    let summary = w.tick().await;
    assert_eq!(summary.rows_written(), 1);
}

#[tokio::test]
async fn watermark_commit_failure_is_a_failure() {
    let series = Arc::new(temp_series());
    let marks = Arc::new(ReadOnlyWatermarks(MemoryWatermarkStore::with_marks([(
        "TEMP".to_string(),
        at(0, 0),
    )])));
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = worker(series.clone(), models, marks);

    let summary = w.tick().await;
    assert_eq!(summary.failed(), 1);
    // Results are durable but the cursor stays put.
    assert_eq!(series.result_count().unwrap(), 2);
    assert_eq!(w.watermark("TEMP").await, Some(at(0, 0)));

    // The retry re-fetches the batch and the idempotent write adds nothing.
    let retry = w.tick().await;
    assert_eq!(retry.failed(), 1);
    assert_eq!(series.result_count().unwrap(), 2);
}

#[tokio::test]
async fn non_finite_observation_does_not_stall_variable() {
    let series = MemorySeriesStore::new();
    series
        .extend([
            Observation::new("TEMP", at(0, 30), 20.0, "feed"),
            Observation::new("TEMP", at(0, 40), f64::NAN, "feed"),
        ])
        .unwrap();
    let series = Arc::new(series);
    let marks = Arc::new(MemoryWatermarkStore::with_marks([("TEMP".to_string(), at(0, 0))]));
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = worker(series.clone(), models, marks.clone());

    let first = w.tick().await;
    assert!(matches!(
        first.outcome("TEMP"),
        Some(VariableOutcome::Processed { rows: 1, .. })
    ));
    assert_eq!(marks.get("TEMP"), Some(at(0, 40)));

    // Later data keeps flowing.
    series
        .extend([
            Observation::new("TEMP", at(0, 50), 20.0, "feed"),
            Observation::new("TEMP", at(0, 55), 21.0, "feed"),
            Observation::new("TEMP", at(2, 0), 19.0, "feed"),
        ])
        .unwrap();
    let second = w.tick().await;
    assert_eq!(second.failed(), 0);
    assert_eq!(second.rows_written(), 3);
    assert_eq!(series.result_count().unwrap(), 4);
    assert_eq!(marks.get("TEMP"), Some(at(2, 0)));
}

#[tokio::test]
async fn batch_of_only_non_finite_values_moves_watermark() {
    let series = MemorySeriesStore::new();
    series
        .insert(Observation::new("TEMP", at(0, 40), f64::INFINITY, "feed"))
        .unwrap();
    let series = Arc::new(series);
    let marks = Arc::new(MemoryWatermarkStore::with_marks([("TEMP".to_string(), at(0, 0))]));
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = worker(series.clone(), models, marks.clone());

    let summary = w.tick().await;
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.rows_written(), 0);
    assert_eq!(series.result_count().unwrap(), 0);
    assert_eq!(marks.get("TEMP"), Some(at(0, 40)));
}

#[tokio::test(start_paused = true)]
async fn run_ticks_on_interval_until_shutdown() {
    let series = Arc::new(temp_series());
    let marks = Arc::new(MemoryWatermarkStore::with_marks([("TEMP".to_string(), at(0, 0))]));
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = Arc::new(worker(series, models, marks));

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn({
        let w = Arc::clone(&w);
        async move { w.run(rx).await }
    });

    // Default interval is 10 minutes: ticks at 0, 10 and 20.
    tokio::time::sleep(Duration::from_secs(25 * 60)).await;
    tx.send(true).unwrap();
    let metrics = handle.await.unwrap();

    assert_eq!(metrics.ticks, 3);
    assert_eq!(metrics.variables_processed, 1);
    assert_eq!(metrics.rows_written, 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_running_tick() {
    let series = Arc::new(SlowWrites {
        inner: temp_series(),
        delay: Duration::from_secs(10),
    });
    let marks = Arc::new(MemoryWatermarkStore::with_marks([("TEMP".to_string(), at(0, 0))]));
    let (_dir, models) = model_store(&["TEMP"]).await;
    let w = Arc::new(worker(series.clone(), models, marks.clone()));

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn({
        let w = Arc::clone(&w);
        async move { w.run(rx).await }
    });

    // The first tick is parked inside its 10s result write.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(w.state("TEMP"), Some(CycleState::Writing));
    tx.send(true).unwrap();
    let metrics = handle.await.unwrap();

    assert_eq!(metrics.ticks, 1);
    assert_eq!(metrics.rows_written, 2);
    assert_eq!(series.inner.result_count().unwrap(), 2);
    assert_eq!(marks.get("TEMP"), Some(at(1, 0)));
    assert_eq!(w.state("TEMP"), Some(CycleState::Idle));
}
