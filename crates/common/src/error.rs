use thiserror::Error;

/// Top-level error type shared by every rasbora component.
#[derive(Debug, Error)]
pub enum RasboraError {
    #[error("shared store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("probe error: {0}")]
    Probe(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

/// Result type alias for rasbora operations.
pub type Result<T> = std::result::Result<T, RasboraError>;
