pub mod chat;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod logs;
pub mod models;
pub mod retrieval;
pub mod store;
pub mod stores;

#[cfg(test)]
mod pdf_fixtures;

pub use chat::{ChatModel, LmStudioChat};
pub use chunking::{build_page_chunks, chunk_page_text, normalize_whitespace, ChunkingConfig};
pub use embeddings::{
    cosine_similarity, Embedder, LmStudioEmbeddings, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, QueryError};
pub use events::{EventPublisher, IngestEvent, HEARTBEAT_INTERVAL};
pub use extractor::{OcrEngine, OcrOutcome, PageExtractor, VlmOcrClient};
pub use index::{digest_bytes, ChecksumIndex};
pub use ingest::{discover_pdf_files, Ingestor};
pub use logs::JsonlLogger;
pub use models::{
    derive_chunk_id, Citation, IngestFileError, IngestResult, IngestionOptions, OcrEvent, Page,
    QueryResult, RetrievalOptions, SourceDocument, SourceRef,
};
pub use retrieval::{Retriever, NOT_FOUND_ANSWER};
pub use store::{ChunkPoint, DocumentSummary, ScoredChunk, VectorIndex};
pub use stores::{JsonlStore, QdrantStore};
