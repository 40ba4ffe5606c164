use crate::embeddings::cosine_similarity;
use crate::error::{IngestError, QueryError};
use crate::store::{ChunkPoint, DocumentSummary, ScoredChunk, VectorIndex};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::warn;

/// File-backed vector store: one JSON line per upsert, replayed on load with
/// last-write-wins per chunk id. The default local backend, and the store the
/// test suite runs against.
pub struct JsonlStore {
    path: PathBuf,
    points: RwLock<HashMap<String, ChunkPoint>>,
}

impl JsonlStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, IngestError> {
        let path = path.into();
        let mut points = HashMap::new();

        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                match serde_json::from_str::<ChunkPoint>(line) {
                    Ok(point) => {
                        points.insert(point.chunk_id.clone(), point);
                    }
                    Err(error) => {
                        warn!(path = %path.display(), %error, "skipping unreadable store line");
                    }
                }
            }
        }

        Ok(Self {
            path,
            points: RwLock::new(points),
        })
    }

    fn append_lines(path: &Path, lines: &[String]) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for JsonlStore {
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), IngestError> {
        let mut lines = Vec::new();
        {
            let mut held = self.points.write().await;
            for point in points {
                // Identical content under an existing id is a no-op; nothing
                // is rewritten on disk either.
                let unchanged = held.get(&point.chunk_id).is_some_and(|existing| {
                    existing.text == point.text
                        && existing.vector == point.vector
                        && existing.metadata == point.metadata
                });
                if unchanged {
                    continue;
                }
                lines.push(serde_json::to_string(point)?);
                held.insert(point.chunk_id.clone(), point.clone());
            }
        }

        if !lines.is_empty() {
            Self::append_lines(&self.path, &lines)?;
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, QueryError> {
        let held = self.points.read().await;
        let mut scored: Vec<ScoredChunk> = held
            .values()
            .map(|point| ScoredChunk {
                chunk_id: point.chunk_id.clone(),
                score: cosine_similarity(vector, &point.vector),
                text: point.text.clone(),
                metadata: point.metadata.clone(),
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn document_summaries(&self) -> Result<Vec<DocumentSummary>, QueryError> {
        let held = self.points.read().await;

        let mut chunk_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut pages: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        for point in held.values() {
            let file = point.metadata.source_file.clone();
            *chunk_counts.entry(file.clone()).or_default() += 1;
            pages.entry(file).or_default().insert(point.metadata.page_number);
        }

        Ok(chunk_counts
            .into_iter()
            .map(|(source_file, chunks)| {
                let page_count = pages.get(&source_file).map(BTreeSet::len).unwrap_or(0);
                DocumentSummary {
                    source_file,
                    chunks,
                    pages: page_count,
                }
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, QueryError> {
        Ok(self.points.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use tempfile::tempdir;

    fn point(id: &str, file: &str, page: u32, text: &str, vector: Vec<f32>) -> ChunkPoint {
        ChunkPoint {
            chunk_id: id.to_string(),
            vector,
            text: text.to_string(),
            metadata: ChunkMetadata {
                source_file: file.to_string(),
                page_number: page,
                chunk_index: 0,
                doc_title: file.to_string(),
                checksum: "abc".to_string(),
                has_text_layer: true,
                ocr_applied: false,
                ocr_confidence: None,
                vlm_used: false,
            },
        }
    }

    #[tokio::test]
    async fn identical_upsert_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonlStore::open(dir.path().join("docs.jsonl"))?;

        let chunk = point("c1", "a.pdf", 1, "text", vec![1.0, 0.0]);
        store.upsert(&[chunk.clone()]).await?;
        store.upsert(&[chunk]).await?;

        assert_eq!(store.count().await?, 1);
        let raw = fs::read_to_string(dir.path().join("docs.jsonl"))?;
        assert_eq!(raw.lines().count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn changed_content_replaces_under_same_id() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store_path = dir.path().join("docs.jsonl");
        let store = JsonlStore::open(&store_path)?;

        store
            .upsert(&[point("c1", "a.pdf", 1, "old text", vec![1.0, 0.0])])
            .await?;
        store
            .upsert(&[point("c1", "a.pdf", 1, "new text", vec![0.0, 1.0])])
            .await?;

        assert_eq!(store.count().await?, 1);
        let hits = store.search(&[0.0, 1.0], 5).await?;
        assert_eq!(hits[0].text, "new text");

        // Last write wins across a reload as well.
        let reloaded = JsonlStore::open(&store_path)?;
        assert_eq!(reloaded.count().await?, 1);
        let hits = reloaded.search(&[0.0, 1.0], 5).await?;
        assert_eq!(hits[0].text, "new text");
        Ok(())
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonlStore::open(dir.path().join("docs.jsonl"))?;

        store
            .upsert(&[
                point("near", "a.pdf", 1, "near", vec![1.0, 0.05]),
                point("far", "a.pdf", 2, "far", vec![0.0, 1.0]),
            ])
            .await?;

        let hits = store.search(&[1.0, 0.0], 2).await?;
        assert_eq!(hits[0].chunk_id, "near");
        assert!(hits[0].score > hits[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn summaries_count_chunks_and_distinct_pages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonlStore::open(dir.path().join("docs.jsonl"))?;

        store
            .upsert(&[
                point("c1", "a.pdf", 1, "t1", vec![1.0]),
                point("c2", "a.pdf", 1, "t2", vec![1.0]),
                point("c3", "a.pdf", 2, "t3", vec![1.0]),
                point("c4", "b.pdf", 1, "t4", vec![1.0]),
            ])
            .await?;

        let summaries = store.document_summaries().await?;
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].source_file, "a.pdf");
        assert_eq!(summaries[0].chunks, 3);
        assert_eq!(summaries[0].pages, 2);
        assert_eq!(summaries[1].source_file, "b.pdf");
        assert_eq!(summaries[1].chunks, 1);
        Ok(())
    }
}
