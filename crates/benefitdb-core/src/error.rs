use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Neither the dense nor the sparse index is available.
    #[error("No index is loaded; run ingestion first")]
    NotIndexed,

    #[error("Embedding service failed: {0}")]
    Embedding(String),

    #[error("Rerank service failed: {0}")]
    Rerank(String),

    #[error("{backend} index error: {message}")]
    Index { backend: &'static str, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Operation(String),
}

impl Error {
    pub fn sparse(err: impl std::fmt::Display) -> Self {
        Self::Index { backend: "sparse", message: err.to_string() }
    }

    pub fn dense(err: impl std::fmt::Display) -> Self {
        Self::Index { backend: "dense", message: err.to_string() }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
