use thiserror::Error;

pub type AttributionResult<T> = Result<T, AttributionError>;

#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Attribution API error: {0}")]
    Api(String),

    #[error("Report export error: {0}")]
    Report(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AttributionError {
    /// Storage failures are the only run-terminating condition; everything
    /// else is aggregated into the run summary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AttributionError::Storage(_) | AttributionError::Config(_)
        )
    }
}
