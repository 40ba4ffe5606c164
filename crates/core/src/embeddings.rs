use crate::error::IngestError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;

/// External embedding capability. One vector per input text, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError>;
}

/// OpenAI-compatible `/v1/embeddings` client (LM Studio and friends).
///
/// Transient transport failures and 5xx responses are retried with
/// exponential backoff before the error is surfaced to the caller.
pub struct LmStudioEmbeddings {
    base_url: String,
    model: String,
    dimensions: usize,
    client: Client,
}

impl LmStudioEmbeddings {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
            client,
        }
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(IngestError::Embedding(format!(
                "transient upstream failure: embeddings endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            // Client errors are configuration problems; retrying cannot help.
            return Err(IngestError::Embedding(format!(
                "embeddings request rejected with {status}"
            )));
        }

        let payload: EmbeddingsResponse = response.json().await?;
        parse_embeddings(payload, texts.len(), self.dimensions)
    }
}

#[async_trait]
impl Embedder for LmStudioEmbeddings {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(error) if is_transient(&error) && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(BACKOFF_BASE_MS << attempt);
                    warn!(attempt, %error, "embedding request failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error
            .unwrap_or_else(|| IngestError::Embedding("embedding retries exhausted".to_string())))
    }
}

fn is_transient(error: &IngestError) -> bool {
    match error {
        IngestError::Http(http) => http.is_timeout() || http.is_connect() || http.is_request(),
        IngestError::Embedding(message) => message.starts_with("transient upstream failure"),
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

fn parse_embeddings(
    payload: EmbeddingsResponse,
    expected_count: usize,
    expected_dimensions: usize,
) -> Result<Vec<Vec<f32>>, IngestError> {
    if payload.data.len() != expected_count {
        return Err(IngestError::Embedding(format!(
            "embeddings endpoint returned {} vectors for {} inputs",
            payload.data.len(),
            expected_count
        )));
    }

    let vectors: Vec<Vec<f32>> = payload.data.into_iter().map(|item| item.embedding).collect();
    for vector in &vectors {
        if vector.len() != expected_dimensions {
            return Err(IngestError::Embedding(format!(
                "embedding dimension {} does not match configured dimension {}",
                vector.len(),
                expected_dimensions
            )));
        }
    }

    Ok(vectors)
}

/// Cosine similarity in `[-1, 1]`; zero when either vector has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_count_mismatch() {
        let payload = EmbeddingsResponse {
            data: vec![EmbeddingItem {
                embedding: vec![0.0; 4],
            }],
        };
        assert!(parse_embeddings(payload, 2, 4).is_err());
    }

    #[test]
    fn parse_rejects_dimension_mismatch() {
        let payload = EmbeddingsResponse {
            data: vec![EmbeddingItem {
                embedding: vec![0.0; 3],
            }],
        };
        assert!(parse_embeddings(payload, 1, 4).is_err());
    }

    #[test]
    fn parse_accepts_matching_payload() {
        let payload = EmbeddingsResponse {
            data: vec![
                EmbeddingItem {
                    embedding: vec![0.1, 0.2],
                },
                EmbeddingItem {
                    embedding: vec![0.3, 0.4],
                },
            ],
        };
        let vectors = parse_embeddings(payload, 2, 2).expect("payload matches");
        assert_eq!(vectors.len(), 2);
    }

    #[test]
    fn cosine_similarity_bounds() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        let zero = vec![0.0, 0.0];

        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &zero), 0.0);
    }
}
