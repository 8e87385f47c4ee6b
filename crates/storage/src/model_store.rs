//! Per-variable model artifacts.
//!
//! Artifacts are opaque byte blobs keyed by variable name. The file backend
//! writes each blob to a hidden temp file, syncs it, then renames it over the
//! final path, so a reader sees either the previous artifact or the new one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::StorageError;

const FILE_PREFIX: &str = "model_";
const FILE_SUFFIX: &str = ".json";
/// Longest encoded key. Leaves room for the prefix, suffix and temp-file
/// decorations under the common 255-byte filename limit.
const MAX_ENCODED_KEY: usize = 200;

#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Persist `artifact` for `variable`, replacing any previous one atomically.
    async fn save(&self, variable: &str, artifact: &[u8]) -> Result<(), StorageError>;

    /// Load the artifact for `variable`. Fails with
    /// [`StorageError::ModelNotFound`] when none was saved.
    async fn load(&self, variable: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, variable: &str) -> Result<bool, StorageError>;

    /// Variables with a saved artifact, sorted.
    async fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// Model store backed by one file per variable in a directory.
pub struct FileModelStore {
    dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl FileModelStore {
    /// Open (and create if needed) a model directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        info!("Model store at {}", dir.display());
        Ok(Self {
            dir,
            tmp_seq: AtomicU64::new(0),
        })
    }

    fn path_for(&self, variable: &str) -> Result<PathBuf, StorageError> {
        Ok(self
            .dir
            .join(format!("{}{}{}", FILE_PREFIX, checked_key(variable)?, FILE_SUFFIX)))
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn save(&self, variable: &str, artifact: &[u8]) -> Result<(), StorageError> {
        let final_path = self.path_for(variable)?;
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.dir.join(format!(
            ".{}{}.{}.{}.tmp",
            FILE_PREFIX,
            checked_key(variable)?,
            std::process::id(),
            seq
        ));

        let write = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(artifact).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &final_path).await
        };

        if let Err(e) = write.await {
            tokio::fs::remove_file(&tmp_path).await.ok();
            return Err(e.into());
        }

        debug!(variable, bytes = artifact.len(), path = %final_path.display(), "model saved");
        Ok(())
    }

    async fn load(&self, variable: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(variable)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ModelNotFound(variable.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, variable: &str) -> Result<bool, StorageError> {
        let path = self.path_for(variable)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut variables = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(encoded) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|n| n.strip_suffix(FILE_SUFFIX))
            else {
                continue;
            };
            if let Some(variable) = decode_key(encoded) {
                variables.push(variable);
            }
        }
        variables.sort();
        Ok(variables)
    }
}

fn checked_key(variable: &str) -> Result<String, StorageError> {
    if variable.is_empty() {
        return Err(StorageError::InvalidKey("empty variable name".into()));
    }
    let encoded = encode_key(variable);
    if encoded.len() > MAX_ENCODED_KEY {
        return Err(StorageError::InvalidKey(format!(
            "variable name encodes to {} bytes, limit is {}",
            encoded.len(),
            MAX_ENCODED_KEY
        )));
    }
    Ok(encoded)
}

/// Filesystem-safe, reversible encoding: ASCII alphanumerics, `_` and `-`
/// are kept, every other byte becomes `%XX`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
