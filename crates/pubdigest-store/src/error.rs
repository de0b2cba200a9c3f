use pubdigest_common::DigestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("object {key} is not valid UTF-8")]
    Encoding { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error in {key}: {source}")]
    Json { key: String, source: serde_json::Error },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for DigestError {
    fn from(err: StoreError) -> Self {
        DigestError::Storage(err.to_string())
    }
}
