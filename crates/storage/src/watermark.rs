//! Durable per-variable watermarks (last successfully processed timestamp).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// All persisted watermarks.
    async fn load(&self) -> Result<BTreeMap<String, DateTime<Utc>>, StorageError>;

    /// Durably record `timestamp` as the watermark of `variable`.
    async fn commit(&self, variable: &str, timestamp: DateTime<Utc>) -> Result<(), StorageError>;
}

/// Watermarks kept in a single JSON file, rewritten atomically on each commit.
pub struct FileWatermarkStore {
    path: PathBuf,
    /// Serialises commits and caches the file contents.
    state: Mutex<Option<BTreeMap<String, DateTime<Utc>>>>,
}

impl FileWatermarkStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            state: Mutex::new(None),
        }
    }

    async fn read_file(&self) -> Result<BTreeMap<String, DateTime<Utc>>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, marks: &BTreeMap<String, DateTime<Utc>>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "watermarks.json".to_string());
        let tmp_path = self.path.with_file_name(format!(".{}.tmp", file_name));

        let json = serde_json::to_vec_pretty(marks)?;
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn load(&self) -> Result<BTreeMap<String, DateTime<Utc>>, StorageError> {
        let mut state = self.state.lock().await;
        let marks = self.read_file().await?;
        *state = Some(marks.clone());
        Ok(marks)
    }

    async fn commit(&self, variable: &str, timestamp: DateTime<Utc>) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let mut marks = match state.take() {
            Some(marks) => marks,
            None => self.read_file().await?,
        };
        let previous = marks.insert(variable.to_string(), timestamp);

        // Keep the cache consistent with disk even if the write fails.
        let written = self.write_file(&marks).await;
        if written.is_err() {
            match previous {
                Some(p) => marks.insert(variable.to_string(), p),
                None => marks.remove(variable),
            };
        }
        *state = Some(marks);
        written?;

        debug!(variable, %timestamp, "watermark committed");
        Ok(())
    }
}
