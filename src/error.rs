//! Custom error types for pdfrag

use thiserror::Error;

/// Main error type for pdfrag operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("LanceDB error: {0}")]
    Lance(String),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(i64),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for pdfrag
pub type Result<T> = std::result::Result<T, Error>;

impl From<lancedb::Error> for Error {
    fn from(err: lancedb::Error) -> Self {
        Error::Lance(err.to_string())
    }
}

impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(err.to_string())
    }
}
