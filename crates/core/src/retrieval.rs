use crate::chat::ChatModel;
use crate::chunking::split_sentences;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::QueryError;
use crate::models::{Citation, QueryResult, RetrievalOptions, SourceRef};
use crate::store::{ScoredChunk, VectorIndex};
use std::sync::Arc;
use tracing::debug;

/// The defined user-visible result when nothing retrieved clears the
/// similarity threshold. Not an error.
pub const NOT_FOUND_ANSWER: &str =
    "I can't find an answer to this question in the indexed documents.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers ONLY from the provided \
    context. Cite sources using [filename.pdf, p X]. If the answer is not in the context, say \
    you can't find it.";

const QUOTE_MAX_CHARS: usize = 200;
const CLAIM_MIN_CHARS: usize = 15;

/// Embeds the query, similarity-searches the store, gates by threshold, and
/// composes a grounded answer with per-claim citations.
///
/// The embedding capability is the same one used at ingest time; a dimension
/// mismatch between the two is a configuration error, never a silently
/// degraded result.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorIndex>,
    chat: Arc<dyn ChatModel>,
    options: RetrievalOptions,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorIndex>,
        chat: Arc<dyn ChatModel>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            embedder,
            store,
            chat,
            options,
        }
    }

    pub async fn query(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<QueryResult, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let top_k = top_k.unwrap_or(self.options.top_k);

        let query_vector = self.embed_one(query).await?;
        let hits = self.store.search(&query_vector, top_k).await?;

        let retained: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.options.similarity_threshold)
            .collect();

        if retained.is_empty() {
            debug!(query, "no chunk cleared the similarity threshold");
            return Ok(QueryResult {
                answer: NOT_FOUND_ANSWER.to_string(),
                citations: Vec::new(),
                sources_used: Vec::new(),
                chunks_retrieved: 0,
            });
        }

        let context = build_context(&retained);
        let user_prompt = format!(
            "Context follows. Use it only.\n\n{context}\n\nQuestion: {query}\nAnswer concisely with citations."
        );
        let answer = self.chat.complete(SYSTEM_PROMPT, &user_prompt).await?;

        let citations = self.map_citations(&answer, &retained).await?;
        let sources_used = dedupe_sources(&retained);

        Ok(QueryResult {
            answer: answer.trim().to_string(),
            citations,
            sources_used,
            chunks_retrieved: retained.len(),
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, QueryError> {
        let vectors = self
            .embedder
            .embed(&[text.to_string()])
            .await
            .map_err(|error| QueryError::Embedding(error.to_string()))?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::Embedding("no vector returned".to_string()))?;

        let expected = self.embedder.dimensions();
        if vector.len() != expected {
            return Err(QueryError::DimensionMismatch {
                expected,
                got: vector.len(),
            });
        }
        Ok(vector)
    }

    /// Aligns answer claims with the chunks that support them. A claim whose
    /// best similarity falls below the threshold is left uncited rather than
    /// pinned to a misleadingly specific source.
    async fn map_citations(
        &self,
        answer: &str,
        chunks: &[ScoredChunk],
    ) -> Result<Vec<Citation>, QueryError> {
        let claims = claim_sentences(answer);
        if claims.is_empty() || chunks.is_empty() {
            return Ok(Vec::new());
        }

        // One batched call covers both sides of the alignment.
        let mut texts = claims.clone();
        texts.extend(chunks.iter().map(|chunk| chunk.text.clone()));
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|error| QueryError::Embedding(error.to_string()))?;
        let (claim_vectors, chunk_vectors) = vectors.split_at(claims.len());

        let mut citations = Vec::new();
        for (claim_index, claim_vector) in claim_vectors.iter().enumerate() {
            let best = chunk_vectors
                .iter()
                .enumerate()
                .map(|(chunk_index, chunk_vector)| {
                    (chunk_index, cosine_similarity(claim_vector, chunk_vector))
                })
                .max_by(|left, right| left.1.total_cmp(&right.1));

            let Some((chunk_index, score)) = best else {
                continue;
            };
            if score < self.options.similarity_threshold {
                debug!(
                    claim = claims[claim_index],
                    score, "claim left unsupported"
                );
                continue;
            }

            let supporting = &chunks[chunk_index];
            citations.push(Citation {
                source_file: supporting.metadata.source_file.clone(),
                page: supporting.metadata.page_number,
                quote: truncate_chars(&supporting.text, QUOTE_MAX_CHARS),
                confidence: score,
            });

            if citations.len() >= self.options.max_citations {
                break;
            }
        }

        Ok(citations)
    }
}

fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|chunk| {
            format!(
                "[{}, p {}]\n{}\n---",
                chunk.metadata.source_file, chunk.metadata.page_number, chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn dedupe_sources(chunks: &[ScoredChunk]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for chunk in chunks {
        let source = SourceRef {
            source_file: chunk.metadata.source_file.clone(),
            page: chunk.metadata.page_number,
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

fn claim_sentences(answer: &str) -> Vec<String> {
    let claims: Vec<String> = split_sentences(answer)
        .into_iter()
        .filter(|sentence| sentence.chars().count() >= CLAIM_MIN_CHARS)
        .collect();

    if claims.is_empty() && !answer.trim().is_empty() {
        return vec![answer.trim().to_string()];
    }
    claims
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
