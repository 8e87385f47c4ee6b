//! On-disk envelope for trained models.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use flowcast_storage::ModelStore;

use crate::algorithms::ForecastModel;
use crate::error::{bounded, PipelineError};

/// Bumped whenever the envelope or a model's serialized shape changes
/// incompatibly. Artifacts with another version are treated as corrupt.
pub const FORMAT_VERSION: u32 = 1;

/// A trained model plus the metadata needed to trust it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact<M> {
    pub format_version: u32,
    pub variable: String,
    pub trained_at: DateTime<Utc>,
    pub training_points: usize,
    pub algorithm: String,
    pub model: M,
}

impl<M: ForecastModel> ModelArtifact<M> {
    pub fn new(variable: &str, algorithm: &str, training_points: usize, model: M) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            variable: variable.to_string(),
            trained_at: Utc::now(),
            training_points,
            algorithm: algorithm.to_string(),
            model,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec(self).map_err(|e| PipelineError::CorruptModel {
            variable: self.variable.clone(),
            reason: format!("encode: {}", e),
        })
    }

    /// Decode an artifact saved under `variable`, checking the format
    /// version and that it was trained for that variable.
    pub fn decode(variable: &str, bytes: &[u8]) -> Result<Self, PipelineError> {
        let corrupt = |reason: String| PipelineError::CorruptModel {
            variable: variable.to_string(),
            reason,
        };
        let artifact: Self = serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
        if artifact.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {} (expected {})",
                artifact.format_version, FORMAT_VERSION
            )));
        }
        if artifact.variable != variable {
            return Err(corrupt(format!(
                "artifact belongs to '{}'",
                artifact.variable
            )));
        }
        Ok(artifact)
    }
}

pub async fn save_model<M: ForecastModel>(
    store: &dyn ModelStore,
    artifact: &ModelArtifact<M>,
    timeout: Duration,
) -> Result<(), PipelineError> {
    let bytes = artifact.encode()?;
    bounded(timeout, "model save", store.save(&artifact.variable, &bytes)).await
}

pub async fn load_model<M: ForecastModel>(
    store: &dyn ModelStore,
    variable: &str,
    timeout: Duration,
) -> Result<ModelArtifact<M>, PipelineError> {
    let bytes = bounded(timeout, "model load", store.load(variable)).await?;
    ModelArtifact::decode(variable, &bytes)
}
