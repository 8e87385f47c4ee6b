use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;

use flowcast_core::config::{AnomalyConfig, WorkerConfig};
use flowcast_storage::{ModelStore, SeriesStore, WatermarkStore};

use crate::algorithms::ForecastModel;
use crate::pipeline::Detector;
use crate::scheduler::metrics::WorkerMetrics;
use crate::scheduler::types::CycleState;

/// The continuous worker. Each tick scores every variable's observations
/// newer than its watermark and advances the watermark after the results
/// are written.
pub struct Worker<M: ForecastModel> {
    pub(super) config: WorkerConfig,
    pub(super) series: Arc<dyn SeriesStore>,
    pub(super) models: Arc<dyn ModelStore>,
    pub(super) watermarks: Arc<dyn WatermarkStore>,
    pub(super) detector: Detector<M>,
    /// Cursor per variable. `None` until loaded from the watermark store.
    pub(super) marks: Mutex<Option<BTreeMap<String, DateTime<Utc>>>>,
    /// Current cycle state per variable.
    pub(super) states: RwLock<BTreeMap<String, CycleState>>,
    pub(super) metrics: RwLock<WorkerMetrics>,
    pub(super) ticks: AtomicU64,
}

impl<M: ForecastModel> Worker<M> {
    pub fn new(
        config: WorkerConfig,
        anomaly: &AnomalyConfig,
        series: Arc<dyn SeriesStore>,
        models: Arc<dyn ModelStore>,
        watermarks: Arc<dyn WatermarkStore>,
    ) -> Self {
        let detector = Detector::new(Arc::clone(&models), anomaly)
            .with_store_timeout(config.store_timeout());
        info!(
            "Worker configured: tick every {:?}, initial lookback {}h, store timeout {:?}",
            config.tick_interval(),
            config.initial_lookback_hours,
            config.store_timeout()
        );
        Self {
            config,
            series,
            models,
            watermarks,
            detector,
            marks: Mutex::new(None),
            states: RwLock::new(BTreeMap::new()),
            metrics: RwLock::new(WorkerMetrics::default()),
            ticks: AtomicU64::new(0),
        }
    }

    /// Snapshot of the cumulative metrics.
    pub fn metrics(&self) -> WorkerMetrics {
        self.metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn state(&self, variable: &str) -> Option<CycleState> {
        self.states.read().ok()?.get(variable).copied()
    }

    /// Watermark currently held for `variable`, if any.
    pub async fn watermark(&self, variable: &str) -> Option<DateTime<Utc>> {
        self.marks.lock().await.as_ref()?.get(variable).copied()
    }

    pub(super) fn set_state(&self, variable: &str, state: CycleState) {
        if let Ok(mut states) = self.states.write() {
            states.insert(variable.to_string(), state);
        }
    }
}
