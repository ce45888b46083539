use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Store error: {0}")]
    Store(#[from] arbor_store::StoreError),

    #[error("Evidence is not a verbatim substring of the window")]
    EvidenceMismatch,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
