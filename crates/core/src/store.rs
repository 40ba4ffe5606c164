use crate::error::{IngestError, QueryError};
use crate::models::ChunkMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One chunk ready for the vector store: stable id, embedding, text, and
/// sanitized scalar metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPoint {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A similarity-search hit, score in cosine-similarity space (higher is
/// closer).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Per-document chunk/page counts, as served by `GET /documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub source_file: String,
    pub chunks: usize,
    pub pages: usize,
}

/// The vector store capability. Upsert is keyed by `chunk_id`: writing the
/// same id with identical content is observably a no-op, writing it with
/// different content replaces the stored vector and metadata.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), IngestError>;

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, QueryError>;

    async fn document_summaries(&self) -> Result<Vec<DocumentSummary>, QueryError>;

    async fn count(&self) -> Result<usize, QueryError>;
}
