use crate::error::{IngestError, QueryError};
use crate::models::ChunkMetadata;
use crate::store::{ChunkPoint, DocumentSummary, ScoredChunk, VectorIndex};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const SCROLL_PAGE_SIZE: usize = 256;

/// Qdrant over its HTTP API. Point ids are the deterministic chunk-id UUIDs,
/// so re-upserting unchanged content lands on the same points.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client,
            vector_size,
        }
    }

    /// Creates the collection with cosine distance if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), IngestError> {
        let response = self
            .client
            .put(format!("{}/collections/{}", self.endpoint, self.collection))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }

        Err(IngestError::VectorStoreWrite {
            backend: "qdrant".to_string(),
            details: format!("collection create returned {status}"),
        })
    }

    async fn scroll_payloads(&self) -> Result<Vec<Value>, QueryError> {
        let mut payloads = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE_SIZE,
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(cursor) = &offset {
                body["offset"] = cursor.clone();
            }

            let response = self
                .client
                .post(format!(
                    "{}/collections/{}/points/scroll",
                    self.endpoint, self.collection
                ))
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(QueryError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: response.status().to_string(),
                });
            }

            let parsed: Value = response.json().await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in points {
                if let Some(payload) = point.pointer("/payload") {
                    payloads.push(payload.clone());
                }
            }

            match parsed.pointer("/result/next_page_offset") {
                Some(cursor) if !cursor.is_null() => offset = Some(cursor.clone()),
                _ => break,
            }
        }

        Ok(payloads)
    }
}

fn metadata_from_payload(payload: &Value) -> Option<ChunkMetadata> {
    serde_json::from_value(payload.clone()).ok()
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), IngestError> {
        if points.is_empty() {
            return Ok(());
        }

        let body_points = points
            .iter()
            .map(|point| {
                if point.vector.len() != self.vector_size {
                    return Err(IngestError::VectorStoreWrite {
                        backend: "qdrant".to_string(),
                        details: format!(
                            "embedding dimension {} != {}",
                            point.vector.len(),
                            self.vector_size
                        ),
                    });
                }

                let mut payload = point.metadata.to_payload();
                payload["text"] = json!(point.text);

                Ok(json!({
                    "id": point.chunk_id,
                    "vector": point.vector,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": body_points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IngestError::VectorStoreWrite {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, QueryError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let raw_hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut hits = Vec::new();
        for hit in raw_hits {
            let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
            let Some(metadata) = metadata_from_payload(&payload) else {
                continue;
            };

            hits.push(ScoredChunk {
                chunk_id: hit
                    .pointer("/id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                text: payload
                    .pointer("/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                metadata,
            });
        }

        Ok(hits)
    }

    async fn document_summaries(&self) -> Result<Vec<DocumentSummary>, QueryError> {
        let payloads = self.scroll_payloads().await?;

        let mut chunk_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut pages: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        for payload in &payloads {
            let file = payload
                .pointer("/source_file")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            *chunk_counts.entry(file.clone()).or_default() += 1;
            if let Some(page) = payload.pointer("/page_number").and_then(Value::as_u64) {
                pages.entry(file).or_default().insert(page);
            }
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
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/count",
                self.endpoint, self.collection
            ))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(QueryError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize)
    }
}
