use std::future::Future;
use std::time::Duration;

use flowcast_storage::StorageError;

use crate::algorithms::ForecastError;

/// Per-variable pipeline failure. None of these abort a worker tick.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no trained model for variable '{0}'")]
    ModelNotFound(String),

    #[error("variable '{variable}' has {points} usable points, need {required}")]
    InsufficientData {
        variable: String,
        points: usize,
        required: usize,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("model for '{variable}' cannot be decoded: {reason}")]
    CorruptModel { variable: String, reason: String },

    #[error("invalid observation for '{variable}': {reason}")]
    InvalidObservation { variable: String, reason: String },

    #[error("fitting '{variable}' failed: {source}")]
    Forecast {
        variable: String,
        #[source]
        source: ForecastError,
    },
}

impl PipelineError {
    /// Skips are expected conditions (no model yet, not enough history) as
    /// opposed to failures that need operator attention.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            PipelineError::ModelNotFound(_) | PipelineError::InsufficientData { .. }
        )
    }

    /// Whether retrying the same work on a later tick may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::StoreUnavailable(_)
                | PipelineError::ModelNotFound(_)
                | PipelineError::InsufficientData { .. }
        )
    }

    /// Short stable label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ModelNotFound(_) => "model_not_found",
            PipelineError::InsufficientData { .. } => "insufficient_data",
            PipelineError::StoreUnavailable(_) => "store_unavailable",
            PipelineError::CorruptModel { .. } => "corrupt_model",
            PipelineError::InvalidObservation { .. } => "invalid_observation",
            PipelineError::Forecast { .. } => "forecast",
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ModelNotFound(variable) => PipelineError::ModelNotFound(variable),
            other => PipelineError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Run a store call with a deadline. Expiry is reported as
/// [`PipelineError::StoreUnavailable`].
pub async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(PipelineError::from),
        Err(_) => Err(PipelineError::StoreUnavailable(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}
