use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Invalid record in {file}: {reason}")]
    InvalidRecord { file: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
