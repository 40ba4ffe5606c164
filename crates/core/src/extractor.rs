use crate::error::IngestError;
use crate::models::{IngestionOptions, OcrEvent, Page};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const OCR_MAX_ATTEMPTS: u32 = 3;
const OCR_BACKOFF_BASE_MS: u64 = 200;

/// Text recovered from one page by the OCR capability.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub text: String,
    pub confidence: Option<f32>,
}

/// External vision-OCR capability, invoked per page.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, document: &[u8], page_number: u32)
        -> Result<OcrOutcome, IngestError>;
}

#[derive(Debug, Clone, Serialize)]
struct VlmOcrRequest<'a> {
    pdf_base64: &'a str,
    page: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct VlmOcrResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// OCR over an HTTP vision-model endpoint: the page's document bytes go out
/// base64-encoded, plain transcribed text comes back.
pub struct VlmOcrClient {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl VlmOcrClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();

        Self {
            endpoint: endpoint.into(),
            api_key,
            client,
        }
    }

    async fn request_once(&self, payload: &VlmOcrRequest<'_>) -> Result<OcrOutcome, IngestError> {
        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR endpoint returned {status}"
            )));
        }

        let parsed: VlmOcrResponse = response.json().await?;
        let text = parsed.text.unwrap_or_default().trim().to_string();
        if text.is_empty() {
            return Err(IngestError::OcrFailed(
                "OCR response had no readable text".to_string(),
            ));
        }

        Ok(OcrOutcome {
            text,
            confidence: parsed.confidence,
        })
    }
}

#[async_trait]
impl OcrEngine for VlmOcrClient {
    async fn recognize(
        &self,
        document: &[u8],
        page_number: u32,
    ) -> Result<OcrOutcome, IngestError> {
        let encoded = STANDARD.encode(document);
        let payload = VlmOcrRequest {
            pdf_base64: &encoded,
            page: page_number,
        };

        let mut last_error = None;
        for attempt in 0..OCR_MAX_ATTEMPTS {
            match self.request_once(&payload).await {
                Ok(outcome) => return Ok(outcome),
                Err(IngestError::Http(http)) if attempt + 1 < OCR_MAX_ATTEMPTS => {
                    let delay = Duration::from_millis(OCR_BACKOFF_BASE_MS << attempt);
                    warn!(page_number, error = %http, "OCR request failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_error = Some(IngestError::Http(http));
                }
                Err(error) => return Err(error),
            }
        }

        Err(last_error
            .unwrap_or_else(|| IngestError::OcrFailed("OCR retries exhausted".to_string())))
    }
}

/// Per-file extraction result: every page of the document, in order, plus the
/// OCR interventions that happened along the way.
#[derive(Debug)]
pub struct ExtractedDocument {
    pub page_count: u32,
    pub pages: Vec<Page>,
    pub ocr_events: Vec<OcrEvent>,
}

/// Opens a PDF, yields per-page text, and decides per page whether OCR is
/// required: either the text layer is missing entirely, or it yields fewer
/// characters than the configured low-text threshold.
pub struct PageExtractor {
    low_text_threshold_chars: usize,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl PageExtractor {
    pub fn new(options: &IngestionOptions, ocr: Option<Arc<dyn OcrEngine>>) -> Self {
        Self {
            low_text_threshold_chars: options.low_text_threshold_chars,
            ocr,
        }
    }

    /// An unparsable document fails the whole file; a failed OCR pass on a
    /// single page does not: the page is kept with whatever native text it
    /// had and the failure is recorded as an OCR event.
    pub async fn extract(
        &self,
        bytes: &[u8],
        source_file: &str,
    ) -> Result<ExtractedDocument, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        let page_count = page_numbers.len() as u32;

        let mut pages = Vec::with_capacity(page_numbers.len());
        let mut ocr_events = Vec::new();

        for page_number in page_numbers {
            // A page whose text operators are broken reads as an empty text
            // layer and falls through to the OCR path.
            let native = document
                .extract_text(&[page_number])
                .unwrap_or_default()
                .trim()
                .to_string();
            let has_text_layer = !native.is_empty();
            let needs_ocr = native.chars().count() < self.low_text_threshold_chars;

            let page = match (&self.ocr, needs_ocr) {
                (Some(engine), true) => {
                    match engine.recognize(bytes, page_number).await {
                        Ok(outcome) => {
                            ocr_events.push(OcrEvent {
                                file: source_file.to_string(),
                                page: page_number,
                                recovered: true,
                                confidence: outcome.confidence,
                                error: None,
                            });
                            Page {
                                number: page_number,
                                text: outcome.text,
                                has_text_layer,
                                ocr_applied: true,
                                ocr_confidence: outcome.confidence,
                            }
                        }
                        Err(error) => {
                            warn!(source_file, page_number, %error, "page OCR failed");
                            ocr_events.push(OcrEvent {
                                file: source_file.to_string(),
                                page: page_number,
                                recovered: false,
                                confidence: None,
                                error: Some(error.to_string()),
                            });
                            Page {
                                number: page_number,
                                text: native,
                                has_text_layer,
                                ocr_applied: true,
                                ocr_confidence: None,
                            }
                        }
                    }
                }
                _ => Page {
                    number: page_number,
                    text: native,
                    has_text_layer,
                    ocr_applied: false,
                    ocr_confidence: None,
                },
            };

            pages.push(page);
        }

        Ok(ExtractedDocument {
            page_count,
            pages,
            ocr_events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf_fixtures::pdf_with_pages;
    use std::sync::Mutex;

    struct FakeOcr {
        text: Option<String>,
        calls: Mutex<Vec<u32>>,
    }

    impl FakeOcr {
        fn recovering(text: &str) -> Self {
            Self {
                text: Some(text.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                text: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn recognize(
            &self,
            _document: &[u8],
            page_number: u32,
        ) -> Result<OcrOutcome, IngestError> {
            self.calls.lock().unwrap().push(page_number);
            match &self.text {
                Some(text) => Ok(OcrOutcome {
                    text: text.clone(),
                    confidence: Some(0.9),
                }),
                None => Err(IngestError::OcrFailed("no vision model".to_string())),
            }
        }
    }

    fn options(low_text_threshold: usize) -> IngestionOptions {
        IngestionOptions {
            low_text_threshold_chars: low_text_threshold,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn native_text_pages_skip_ocr() -> Result<(), IngestError> {
        let bytes = pdf_with_pages(&[
            "This page has a perfectly healthy native text layer to read from.",
            "So does this one, with even more native text to extract and chunk.",
        ]);
        let ocr = Arc::new(FakeOcr::recovering("unused"));
        let extractor = PageExtractor::new(&options(10), Some(ocr.clone()));

        let extracted = extractor.extract(&bytes, "manual.pdf").await?;
        assert_eq!(extracted.page_count, 2);
        assert!(extracted.ocr_events.is_empty());
        assert!(extracted.pages.iter().all(|page| !page.ocr_applied));
        assert!(extracted.pages.iter().all(|page| page.has_text_layer));
        assert!(ocr.calls.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_text_layer_triggers_ocr() -> Result<(), IngestError> {
        let bytes = pdf_with_pages(&[""]);
        let extractor = PageExtractor::new(
            &options(10),
            Some(Arc::new(FakeOcr::recovering("Recovered scanned text."))),
        );

        let extracted = extractor.extract(&bytes, "scan.pdf").await?;
        assert_eq!(extracted.pages.len(), 1);
        let page = &extracted.pages[0];
        assert!(!page.has_text_layer);
        assert!(page.ocr_applied);
        assert_eq!(page.text, "Recovered scanned text.");
        assert_eq!(page.ocr_confidence, Some(0.9));
        assert_eq!(extracted.ocr_events.len(), 1);
        assert!(extracted.ocr_events[0].recovered);
        Ok(())
    }

    #[tokio::test]
    async fn low_text_density_triggers_ocr() -> Result<(), IngestError> {
        let bytes = pdf_with_pages(&["tiny"]);
        let extractor = PageExtractor::new(
            &options(50),
            Some(Arc::new(FakeOcr::recovering("Full transcription of the page."))),
        );

        let extracted = extractor.extract(&bytes, "sparse.pdf").await?;
        let page = &extracted.pages[0];
        assert!(page.has_text_layer);
        assert!(page.ocr_applied);
        assert_eq!(page.text, "Full transcription of the page.");
        Ok(())
    }

    #[tokio::test]
    async fn ocr_failure_keeps_the_page_and_records_an_event() -> Result<(), IngestError> {
        let bytes = pdf_with_pages(&["", "Second page with plenty of readable native text on it."]);
        let extractor = PageExtractor::new(&options(10), Some(Arc::new(FakeOcr::failing())));

        let extracted = extractor.extract(&bytes, "scan.pdf").await?;
        assert_eq!(extracted.pages.len(), 2);

        let failed = &extracted.pages[0];
        assert!(failed.ocr_applied);
        assert!(failed.text.is_empty());
        assert_eq!(failed.ocr_confidence, None);

        assert_eq!(extracted.ocr_events.len(), 1);
        assert!(!extracted.ocr_events[0].recovered);
        assert!(extracted.ocr_events[0].error.is_some());

        // The healthy page is unaffected by its neighbor's OCR failure.
        assert!(!extracted.pages[1].ocr_applied);
        Ok(())
    }

    #[tokio::test]
    async fn without_an_engine_textless_pages_stay_empty() -> Result<(), IngestError> {
        let bytes = pdf_with_pages(&[""]);
        let extractor = PageExtractor::new(&options(10), None);

        let extracted = extractor.extract(&bytes, "scan.pdf").await?;
        assert_eq!(extracted.page_count, 1);
        assert!(!extracted.pages[0].ocr_applied);
        assert!(extracted.pages[0].text.is_empty());
        assert!(extracted.ocr_events.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unparsable_document_fails_the_file() {
        let extractor = PageExtractor::new(&options(10), None);
        let result = extractor.extract(b"%PDF-1.4\n%broken", "broken.pdf").await;
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }
}
