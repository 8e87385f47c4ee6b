use async_trait::async_trait;
use chrono::{DateTime, Utc};

use flowcast_core::{AnomalyResult, Observation, TimeRange};

use crate::error::StorageError;

/// Source of observations and sink for scored results.
///
/// Result writes must be idempotent on `(variable, timestamp)`: writing a
/// row whose key already exists is a silent no-op. The worker relies on this
/// to re-process a batch after a crash without duplicating rows.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Distinct variable names present in the observation table.
    async fn variables(&self) -> Result<Vec<String>, StorageError>;

    /// Observations of `variable` inside `range`, ordered by timestamp.
    /// Rows sharing a timestamp keep their storage order.
    async fn fetch(
        &self,
        variable: &str,
        range: TimeRange,
    ) -> Result<Vec<Observation>, StorageError>;

    /// Append results. Returns the number of rows actually inserted.
    async fn write_results(&self, results: &[AnomalyResult]) -> Result<u64, StorageError>;

    /// Latest result timestamp already stored for `variable`.
    async fn latest_result(&self, variable: &str)
        -> Result<Option<DateTime<Utc>>, StorageError>;
}
