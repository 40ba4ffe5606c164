use chrono::Utc;
use clap::Parser;
use pdf_rag_core::{
    ChecksumIndex, EventPublisher, IngestionOptions, Ingestor, JsonlLogger, JsonlStore,
    LmStudioChat, LmStudioEmbeddings, OcrEngine, PageExtractor, QdrantStore, RetrievalOptions,
    Retriever, VectorIndex, VlmOcrClient, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod server;

use server::AppState;

#[derive(Parser)]
#[command(name = "pdf-rag-server", version)]
struct Cli {
    /// Address the HTTP server binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Directory scanned recursively for source PDFs.
    #[arg(long, env = "PDF_SOURCE_DIR", default_value = "training_data")]
    source_dir: PathBuf,

    /// Directory holding the checksum index, local vector store, and request logs.
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Base URL of the OpenAI-compatible embedding server.
    #[arg(long, env = "EMBEDDINGS_BASE_URL", default_value = "http://localhost:1234")]
    embeddings_base_url: String,

    /// Embedding model identifier.
    #[arg(
        long,
        env = "EMBEDDINGS_MODEL_ID",
        default_value = "text-embedding-qwen3-embedding-4b"
    )]
    embeddings_model: String,

    /// Expected embedding vector width.
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Base URL of the OpenAI-compatible chat server.
    #[arg(long, env = "LLM_BASE_URL", default_value = "http://localhost:1234")]
    llm_base_url: String,

    /// Chat model identifier used for answer synthesis.
    #[arg(long, env = "LLM_MODEL_ID", default_value = "qwen/qwen3-14b")]
    llm_model: String,

    /// Vision OCR endpoint; when unset, textless pages keep their empty text.
    #[arg(long, env = "OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Bearer token for the OCR endpoint.
    #[arg(long, env = "OCR_API_KEY")]
    ocr_api_key: Option<String>,

    /// Qdrant base URL; when unset, chunks persist to a JSONL store under
    /// the data dir.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection name.
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "pdf_chunks")]
    qdrant_collection: String,

    /// Target chunk size in characters.
    #[arg(long, env = "CHUNK_SIZE_CHARS", default_value_t = 1000)]
    chunk_size_chars: usize,

    /// Overlap carried between consecutive chunks, in characters.
    #[arg(long, env = "CHUNK_OVERLAP_CHARS", default_value_t = 200)]
    chunk_overlap_chars: usize,

    /// Pages with fewer extracted characters than this are sent to OCR.
    #[arg(long, env = "LOW_TEXT_THRESHOLD_CHARS", default_value_t = 50)]
    low_text_threshold_chars: usize,

    /// Default number of chunks retrieved per query.
    #[arg(long, env = "TOP_K", default_value_t = 8)]
    top_k: usize,

    /// Minimum cosine similarity for a chunk to count as relevant.
    #[arg(long, env = "SIMILARITY_THRESHOLD", default_value_t = 0.7)]
    similarity_threshold: f32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir)?;

    let ingestion_options = IngestionOptions {
        chunk_size_chars: cli.chunk_size_chars,
        chunk_overlap_chars: cli.chunk_overlap_chars,
        low_text_threshold_chars: cli.low_text_threshold_chars,
    };
    let retrieval_options = RetrievalOptions {
        top_k: cli.top_k,
        similarity_threshold: cli.similarity_threshold,
        ..RetrievalOptions::default()
    };

    let embedder = Arc::new(LmStudioEmbeddings::new(
        &cli.embeddings_base_url,
        &cli.embeddings_model,
        cli.embedding_dimensions,
    ));
    let chat = Arc::new(LmStudioChat::new(&cli.llm_base_url, &cli.llm_model));

    let ocr: Option<Arc<dyn OcrEngine>> = cli
        .ocr_endpoint
        .as_ref()
        .map(|endpoint| {
            Arc::new(VlmOcrClient::new(endpoint, cli.ocr_api_key.clone())) as Arc<dyn OcrEngine>
        });

    let store: Arc<dyn VectorIndex> = match &cli.qdrant_url {
        Some(url) => {
            let qdrant = QdrantStore::new(url, &cli.qdrant_collection, cli.embedding_dimensions);
            qdrant
                .ensure_collection()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            Arc::new(qdrant)
        }
        None => {
            let path = cli.data_dir.join("chunks.jsonl");
            Arc::new(
                JsonlStore::open(&path).map_err(|error| anyhow::anyhow!(error.to_string()))?,
            )
        }
    };

    let index = ChecksumIndex::load(cli.data_dir.join("ingest_index.json"));
    let extractor = PageExtractor::new(&ingestion_options, ocr);
    let events = EventPublisher::new();
    let _heartbeat = events.spawn_heartbeat();

    let ingestor = Arc::new(Ingestor::new(
        &cli.source_dir,
        ingestion_options,
        index,
        extractor,
        embedder.clone(),
        store.clone(),
        events.clone(),
    ));
    let retriever = Arc::new(Retriever::new(
        embedder,
        store.clone(),
        chat,
        retrieval_options,
    ));

    let state = AppState {
        ingestor,
        retriever,
        events,
        store,
        ingest_log: Arc::new(JsonlLogger::new(cli.data_dir.join("ingest_log.jsonl"))),
        query_log: Arc::new(JsonlLogger::new(cli.data_dir.join("query_log.jsonl"))),
        embeddings_base_url: cli.embeddings_base_url.clone(),
        llm_base_url: cli.llm_base_url.clone(),
    };

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        source_dir = %cli.source_dir.display(),
        bind = %cli.bind,
        "pdf-rag-server boot"
    );

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    axum::serve(listener, server::router(state)).await?;

    Ok(())
}
