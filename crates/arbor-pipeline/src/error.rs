use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Model error: {0}")]
    Model(#[from] crate::provider::ModelError),

    #[error("Store error: {0}")]
    Store(#[from] arbor_store::StoreError),

    #[error("Memory error: {0}")]
    Memory(#[from] arbor_memory::MemoryError),

    #[error("Core error: {0}")]
    Core(#[from] arbor_core::CoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
