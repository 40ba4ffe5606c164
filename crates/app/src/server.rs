//! HTTP surface: thin request/response mapping over the core pipeline.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest?force={bool}` | Run an ingest pass, return the summary |
//! | `POST` | `/query` | Answer a question with citations |
//! | `GET`  | `/documents` | Per-document chunk/page counts |
//! | `GET`  | `/events/ingest` | SSE stream of ingestion lifecycle events |
//! | `GET`  | `/logs/ingest`, `/logs/query` | Recent request logs, newest-last |
//! | `GET`  | `/health` | Liveness plus dependency probes |

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use pdf_rag_core::{
    EventPublisher, IngestError, Ingestor, JsonlLogger, QueryError, Retriever, VectorIndex,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const DEFAULT_LOG_LIMIT: usize = 200;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub retriever: Arc<Retriever>,
    pub events: EventPublisher,
    pub store: Arc<dyn VectorIndex>,
    pub ingest_log: Arc<JsonlLogger>,
    pub query_log: Arc<JsonlLogger>,
    pub embeddings_base_url: String,
    pub llm_base_url: String,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/query", post(handle_query))
        .route("/documents", get(handle_documents))
        .route("/events/ingest", get(handle_events))
        .route("/logs/ingest", get(handle_ingest_logs))
        .route("/logs/query", get(handle_query_logs))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct IngestQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Default, Deserialize)]
struct IngestRequest {
    #[serde(default)]
    paths: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn ingest_status(error: &IngestError) -> StatusCode {
    match error {
        IngestError::SourceNotFound(_) => StatusCode::BAD_REQUEST,
        IngestError::IngestInProgress => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn query_status(error: &QueryError) -> StatusCode {
    match error {
        QueryError::EmptyQuery => StatusCode::BAD_REQUEST,
        QueryError::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<IngestError> for AppError {
    fn from(error: IngestError) -> Self {
        Self {
            status: ingest_status(&error),
            message: error.to_string(),
        }
    }
}

impl From<QueryError> for AppError {
    fn from(error: QueryError) -> Self {
        Self {
            status: query_status(&error),
            message: error.to_string(),
        }
    }
}

async fn handle_ingest(
    State(state): State<AppState>,
    Query(query): Query<IngestQuery>,
    body: Option<Json<IngestRequest>>,
) -> Result<Json<pdf_rag_core::IngestResult>, AppError> {
    let request = body.map(|Json(inner)| inner).unwrap_or_default();

    let result = state
        .ingestor
        .ingest(request.paths.as_deref(), query.force)
        .await?;

    info!(
        files_found = result.files_found,
        files_processed = result.files_processed,
        chunks_upserted = result.chunks_upserted,
        errors = result.errors.len(),
        "ingest run complete"
    );
    if let Ok(record) = serde_json::to_value(&result) {
        let _ = state.ingest_log.append(record);
    }

    Ok(Json(result))
}

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<pdf_rag_core::QueryResult>, AppError> {
    let result = state.retriever.query(&request.query, request.top_k).await?;

    let _ = state.query_log.append(json!({
        "query": request.query,
        "chunks_retrieved": result.chunks_retrieved,
        "citations": result.citations.len(),
    }));

    Ok(Json(result))
}

async fn handle_documents(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let documents = state.store.document_summaries().await?;
    let total_chunks = state.store.count().await?;

    Ok(Json(json!({
        "documents": documents,
        "total_chunks": total_chunks,
    })))
}

async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let receiver = state.events.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(event) => Some(Event::default().json_data(&event)),
            // The subscriber lagged and lost its oldest events; the stream
            // itself stays up.
            Err(BroadcastStreamRecvError::Lagged(_)) => None,
        }
    });

    Sse::new(stream)
}

async fn handle_ingest_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<serde_json::Value>> {
    Json(state.ingest_log.tail(query.limit.unwrap_or(DEFAULT_LOG_LIMIT)))
}

async fn handle_query_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<serde_json::Value>> {
    Json(state.query_log.tail(query.limit.unwrap_or(DEFAULT_LOG_LIMIT)))
}

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .unwrap_or_default();

    let embeddings_ok = probe_models_endpoint(&client, &state.embeddings_base_url).await;
    let chat_ok = probe_models_endpoint(&client, &state.llm_base_url).await;
    let store_ok = state.store.count().await.is_ok();

    Json(json!({
        "ok": embeddings_ok && chat_ok && store_ok,
        "details": {
            "embeddings": embeddings_ok,
            "chat": chat_ok,
            "vector_store": store_ok,
        },
    }))
}

async fn probe_models_endpoint(client: &reqwest::Client, base_url: &str) -> bool {
    let url = format!("{}/v1/models", base_url.trim_end_matches('/'));
    match client.get(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_errors_map_to_expected_statuses() {
        assert_eq!(
            ingest_status(&IngestError::SourceNotFound("missing".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ingest_status(&IngestError::IngestInProgress),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ingest_status(&IngestError::PdfParse("broken".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn query_errors_map_to_expected_statuses() {
        assert_eq!(query_status(&QueryError::EmptyQuery), StatusCode::BAD_REQUEST);
        assert_eq!(
            query_status(&QueryError::DimensionMismatch {
                expected: 768,
                got: 384
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            query_status(&QueryError::ChatFailed("down".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn ingest_request_body_defaults_to_full_scan() {
        let request: IngestRequest = serde_json::from_str("{}").expect("empty body parses");
        assert!(request.paths.is_none());

        let request: IngestRequest =
            serde_json::from_str(r#"{"paths": ["a.pdf"]}"#).expect("paths parse");
        assert_eq!(request.paths, Some(vec!["a.pdf".to_string()]));
    }
}
