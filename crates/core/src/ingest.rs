use crate::chunking::build_page_chunks;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::events::{EventPublisher, IngestEvent};
use crate::extractor::PageExtractor;
use crate::index::{digest_bytes, ChecksumIndex};
use crate::models::{
    IngestFileError, IngestResult, IngestionOptions, OcrEvent, SourceDocument,
};
use crate::store::{ChunkPoint, VectorIndex};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Recursive scan for PDFs, in stable sorted order.
pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

struct FileOutcome {
    pages: usize,
    chunks: usize,
    embed_latency_ms: u64,
    ocr_events: Vec<OcrEvent>,
}

/// Drives extraction, chunking, embedding, and upsert for a set of files.
///
/// The checksum index sits behind a mutex that doubles as the run lock: a
/// second ingest call arriving while one is in progress is rejected with
/// [`IngestError::IngestInProgress`] rather than allowed to interleave index
/// writes. Per-file failures are isolated; one bad file never aborts the run.
pub struct Ingestor {
    source_dir: PathBuf,
    options: IngestionOptions,
    index: Mutex<ChecksumIndex>,
    extractor: PageExtractor,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorIndex>,
    events: EventPublisher,
}

impl Ingestor {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        options: IngestionOptions,
        index: ChecksumIndex,
        extractor: PageExtractor,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorIndex>,
        events: EventPublisher,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            options,
            index: Mutex::new(index),
            extractor,
            embedder,
            store,
            events,
        }
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Runs one ingest pass and returns a complete summary even when some
    /// files failed. `force` clears the checksum index before scanning, so
    /// every file reprocesses regardless of content.
    pub async fn ingest(
        &self,
        paths: Option<&[String]>,
        force: bool,
    ) -> Result<IngestResult, IngestError> {
        let mut index = self
            .index
            .try_lock()
            .map_err(|_| IngestError::IngestInProgress)?;

        if !self.source_dir.is_dir() {
            return Err(IngestError::SourceNotFound(self.source_dir.clone()));
        }

        if force {
            index.clear();
        }

        let targets = self.resolve_targets(paths);
        let mut result = IngestResult {
            files_found: targets.len(),
            ..Default::default()
        };

        self.events.publish(IngestEvent::IngestRunStart {
            count_files: targets.len(),
        });

        for path in targets {
            let file = self.relative_name(&path);

            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(error) => {
                    self.record_file_error(&mut result, &file, &IngestError::Io(error));
                    continue;
                }
            };

            let checksum = digest_bytes(&bytes);
            if !force && index.lookup(&file) == Some(checksum.as_str()) {
                result.files_skipped += 1;
                result.skipped_list.push(file.clone());
                self.events
                    .publish(IngestEvent::IngestFileSkipped { file });
                continue;
            }

            self.events
                .publish(IngestEvent::IngestFileStart { file: file.clone() });

            match self.process_file(&file, &bytes, &checksum).await {
                Ok(outcome) => {
                    // The index only learns about a file once its chunks are
                    // fully upserted, so a failed file reprocesses next run.
                    index.update(&file, &checksum);
                    result.files_processed += 1;
                    result.pages_processed += outcome.pages;
                    result.chunks_upserted += outcome.chunks;
                    result.ocr_events.extend(outcome.ocr_events);
                    result.processed_list.push(file.clone());
                    info!(file, chunks = outcome.chunks, "file ingested");
                    self.events.publish(IngestEvent::IngestFileDone {
                        file,
                        chunks: outcome.chunks,
                        pages: outcome.pages,
                        embed_latency_ms: outcome.embed_latency_ms,
                    });
                }
                Err(error) => self.record_file_error(&mut result, &file, &error),
            }
        }

        index.persist()?;

        self.events.publish(IngestEvent::IngestRunDone {
            files_processed: result.files_processed,
            pages_processed: result.pages_processed,
            chunks_upserted: result.chunks_upserted,
            errors: result.errors.len(),
        });

        Ok(result)
    }

    fn record_file_error(&self, result: &mut IngestResult, file: &str, error: &IngestError) {
        warn!(file, %error, "file failed, continuing with the rest of the run");
        result.errors.push(IngestFileError {
            file: file.to_string(),
            error: error.to_string(),
        });
        self.events.publish(IngestEvent::IngestFileError {
            file: file.to_string(),
            error: error.to_string(),
        });
    }

    fn resolve_targets(&self, paths: Option<&[String]>) -> Vec<PathBuf> {
        match paths {
            Some(listed) => listed
                .iter()
                .map(|raw| {
                    let path = Path::new(raw);
                    if path.is_absolute() {
                        path.to_path_buf()
                    } else {
                        self.source_dir.join(path)
                    }
                })
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .and_then(|ext| ext.to_str())
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
                })
                .collect(),
            None => discover_pdf_files(&self.source_dir),
        }
    }

    fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.source_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    async fn process_file(
        &self,
        file: &str,
        bytes: &[u8],
        checksum: &str,
    ) -> Result<FileOutcome, IngestError> {
        let extracted = self.extractor.extract(bytes, file).await?;

        let document = SourceDocument {
            doc_id: SourceDocument::derive_doc_id(file),
            filename: file.to_string(),
            checksum: checksum.to_string(),
            page_count: extracted.page_count,
        };

        let mut records = Vec::new();
        for page in &extracted.pages {
            records.extend(build_page_chunks(&document, page, &self.options)?);
        }

        let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
        let started = Instant::now();
        let vectors = self.embedder.embed(&texts).await?;
        let embed_latency_ms = started.elapsed().as_millis() as u64;

        if vectors.len() != records.len() {
            return Err(IngestError::Embedding(format!(
                "{} vectors returned for {} chunks",
                vectors.len(),
                records.len()
            )));
        }

        let points: Vec<ChunkPoint> = records
            .into_iter()
            .zip(vectors)
            .map(|(record, vector)| ChunkPoint {
                chunk_id: record.chunk_id,
                vector,
                text: record.text,
                metadata: record.metadata,
            })
            .collect();

        self.store.upsert(&points).await?;

        Ok(FileOutcome {
            pages: extracted.page_count as usize,
            chunks: points.len(),
            embed_latency_ms,
            ocr_events: extracted.ocr_events,
        })
    }
}
