use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no model saved for variable '{0}'")]
    ModelNotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    /// Lock poisoning in the in-memory stores.
    pub(crate) fn poisoned(what: &str) -> Self {
        StorageError::Unavailable(format!("{} lock poisoned", what))
    }
}
