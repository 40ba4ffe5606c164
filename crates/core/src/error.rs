use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("another ingest run is already in progress")]
    IngestInProgress,

    #[error("pdf parse error: {0}")]
    PdfParse(String),

#[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("vector store {backend} rejected write: {details}")]
    VectorStoreWrite { backend: String, details: String },

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("embedding dimension {got} does not match configured dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("chat completion failed: {0}")]
    ChatFailed(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
