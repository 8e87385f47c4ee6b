//! In-memory stores. Used by tests and for dry runs against fixture data.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use flowcast_core::{AnomalyResult, Observation, TimeRange};

use crate::error::StorageError;
use crate::series::SeriesStore;
use crate::watermark::WatermarkStore;

/// Series store holding observations and results in memory.
#[derive(Default)]
pub struct MemorySeriesStore {
    /// variable -> observations in insertion order.
    observations: RwLock<BTreeMap<String, Vec<Observation>>>,
    /// (variable, timestamp) -> result.
    results: RwLock<BTreeMap<(String, DateTime<Utc>), AnomalyResult>>,
}

impl MemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, observation: Observation) -> Result<(), StorageError> {
        let mut obs = self
            .observations
            .write()
            .map_err(|_| StorageError::poisoned("observations"))?;
        obs.entry(observation.variable.clone())
            .or_default()
            .push(observation);
        Ok(())
    }

    pub fn extend(&self, observations: impl IntoIterator<Item = Observation>) -> Result<(), StorageError> {
        for o in observations {
            self.insert(o)?;
        }
        Ok(())
    }

    /// Stored results for `variable`, ordered by timestamp.
    pub fn results(&self, variable: &str) -> Result<Vec<AnomalyResult>, StorageError> {
        let results = self
            .results
            .read()
            .map_err(|_| StorageError::poisoned("results"))?;
        Ok(results
            .iter()
            .filter(|((v, _), _)| v == variable)
            .map(|(_, r)| r.clone())
            .collect())
    }

    pub fn result_count(&self) -> Result<usize, StorageError> {
        Ok(self
            .results
            .read()
            .map_err(|_| StorageError::poisoned("results"))?
            .len())
    }
}

#[async_trait]
impl SeriesStore for MemorySeriesStore {
    async fn variables(&self) -> Result<Vec<String>, StorageError> {
        let obs = self
            .observations
            .read()
            .map_err(|_| StorageError::poisoned("observations"))?;
        Ok(obs.keys().cloned().collect())
    }

    async fn fetch(
        &self,
        variable: &str,
        range: TimeRange,
    ) -> Result<Vec<Observation>, StorageError> {
        let obs = self
            .observations
            .read()
            .map_err(|_| StorageError::poisoned("observations"))?;
        let mut rows: Vec<Observation> = obs
            .get(variable)
            .map(|rows| {
                rows.iter()
                    .filter(|o| range.contains(o.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Stable: equal timestamps keep insertion order.
        rows.sort_by_key(|o| o.timestamp);
        Ok(rows)
    }

    async fn write_results(&self, results: &[AnomalyResult]) -> Result<u64, StorageError> {
        let mut stored = self
            .results
            .write()
            .map_err(|_| StorageError::poisoned("results"))?;
        let mut inserted = 0;
        for r in results {
            let (variable, timestamp) = r.key();
            let key = (variable.to_string(), timestamp);
            if !stored.contains_key(&key) {
                stored.insert(key, r.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn latest_result(
        &self,
        variable: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let stored = self
            .results
            .read()
            .map_err(|_| StorageError::poisoned("results"))?;
        Ok(stored
            .keys()
            .filter(|(v, _)| v == variable)
            .map(|(_, ts)| *ts)
            .max())
    }
}

/// Watermarks that live only as long as the process.
#[derive(Default)]
pub struct MemoryWatermarkStore {
    marks: RwLock<BTreeMap<String, DateTime<Utc>>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marks(marks: impl IntoIterator<Item = (String, DateTime<Utc>)>) -> Self {
        Self {
            marks: RwLock::new(marks.into_iter().collect()),
        }
    }

    pub fn get(&self, variable: &str) -> Option<DateTime<Utc>> {
        self.marks.read().ok()?.get(variable).copied()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn load(&self) -> Result<BTreeMap<String, DateTime<Utc>>, StorageError> {
        Ok(self
            .marks
            .read()
            .map_err(|_| StorageError::poisoned("watermarks"))?
            .clone())
    }

    async fn commit(&self, variable: &str, timestamp: DateTime<Utc>) -> Result<(), StorageError> {
        self.marks
            .write()
            .map_err(|_| StorageError::poisoned("watermarks"))?
            .insert(variable.to_string(), timestamp);
        Ok(())
    }
}
