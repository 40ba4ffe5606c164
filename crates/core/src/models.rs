use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A source PDF as last seen by a successful ingest pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub doc_id: String,
    pub filename: String,
    pub checksum: String,
    pub page_count: u32,
}

impl SourceDocument {
    /// Document ids are derived from the relative source path, so a file keeps
    /// its identity across re-ingests even when its content changes.
    pub fn derive_doc_id(relative_path: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(relative_path.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// One extracted page. Produced per ingest pass; only its chunks are persisted.
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
    pub has_text_layer: bool,
    pub ocr_applied: bool,
    pub ocr_confidence: Option<f32>,
}

/// Scalar metadata stored alongside every chunk in the vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub page_number: u32,
    pub chunk_index: u64,
    pub doc_title: String,
    pub checksum: String,
    pub has_text_layer: bool,
    pub ocr_applied: bool,
    pub ocr_confidence: Option<f32>,
    pub vlm_used: bool,
}

impl ChunkMetadata {
    /// Payload form accepted by the vector store: scalars only, never null.
    /// Absent confidence is written as `0.0`.
    pub fn to_payload(&self) -> Value {
        json!({
            "source_file": self.source_file,
            "page_number": self.page_number,
            "chunk_index": self.chunk_index,
            "doc_title": self.doc_title,
            "checksum": self.checksum,
            "has_text_layer": self.has_text_layer,
            "ocr_applied": self.ocr_applied,
            "ocr_confidence": self.ocr_confidence.unwrap_or(0.0),
            "vlm_used": self.vlm_used,
        })
    }
}

/// A page-bounded text segment, the atomic retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub page_number: u32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Deterministic chunk id from the `(doc_id, page, sequence)` triple, shaped
/// as a UUID so every store backend accepts it as a point id. Distinct triples
/// never collide; unchanged content re-derives the same id on re-ingest.
pub fn derive_chunk_id(doc_id: &str, page_number: u32, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(page_number.to_le_bytes());
    hasher.update(sequence.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// A structured per-file failure surfaced in the ingest summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestFileError {
    pub file: String,
    pub error: String,
}

/// One OCR intervention (or OCR failure) on a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrEvent {
    pub file: String,
    pub page: u32,
    pub recovered: bool,
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate summary returned by every ingest call, complete even when some
/// files failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestResult {
    pub files_found: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_upserted: usize,
    pub pages_processed: usize,
    pub processed_list: Vec<String>,
    pub skipped_list: Vec<String>,
    pub errors: Vec<IngestFileError>,
    pub ocr_events: Vec<OcrEvent>,
}

/// A supporting passage for one claim of a generated answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source_file: String,
    pub page: u32,
    pub quote: String,
    pub confidence: f32,
}

/// A `(file, page)` pair that contributed retrieved context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_file: String,
    pub page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub sources_used: Vec<SourceRef>,
    pub chunks_retrieved: usize,
}

/// Knobs for extraction and chunking.
#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
    /// Pages whose native text layer yields fewer trimmed characters than
    /// this trigger OCR.
    pub low_text_threshold_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size_chars: 1_000,
            chunk_overlap_chars: 200,
            low_text_threshold_chars: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub similarity_threshold: f32,
    /// Upper bound on cited claims per answer.
    pub max_citations: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 8,
            similarity_threshold: 0.7,
            max_citations: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_stable_and_collision_free() {
        let first = derive_chunk_id("doc-1", 3, 0);
        let again = derive_chunk_id("doc-1", 3, 0);
        assert_eq!(first, again);

        let other_page = derive_chunk_id("doc-1", 4, 0);
        let other_seq = derive_chunk_id("doc-1", 3, 1);
        let other_doc = derive_chunk_id("doc-2", 3, 0);
        assert_ne!(first, other_page);
        assert_ne!(first, other_seq);
        assert_ne!(first, other_doc);
    }

    #[test]
    fn chunk_ids_parse_as_uuids() {
        let id = derive_chunk_id("doc-1", 1, 7);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn payload_never_contains_null() {
        let metadata = ChunkMetadata {
            source_file: "manual.pdf".to_string(),
            page_number: 2,
            chunk_index: 5,
            doc_title: "manual.pdf".to_string(),
            checksum: "abc".to_string(),
            has_text_layer: false,
            ocr_applied: true,
            ocr_confidence: None,
            vlm_used: true,
        };

        let payload = metadata.to_payload();
        let object = payload.as_object().expect("payload is an object");
        assert!(object.values().all(|value| !value.is_null()));
        assert_eq!(object["ocr_confidence"], json!(0.0));
    }
}
