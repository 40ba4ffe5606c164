use crate::error::IngestError;
use crate::models::{derive_chunk_id, ChunkMetadata, ChunkRecord, IngestionOptions, Page, SourceDocument};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub size_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn validated(self) -> Result<Self, IngestError> {
        if self.size_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.size_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.size_chars
            )));
        }
        Ok(self)
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            size_chars: value.chunk_size_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Splits on sentence terminators followed by whitespace. The terminator run
/// stays with its sentence; trailing text without a terminator becomes the
/// final sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary =
        BOUNDARY.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("literal pattern compiles"));

    let mut sentences = Vec::new();
    let mut cursor = 0;
    for found in boundary.find_iter(text) {
        let end = found.start() + found.as_str().trim_end().len();
        let sentence = text[cursor..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        cursor = found.end();
    }

    let tail = text[cursor..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

fn tail_chars(text: &str, count: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(count);
    chars[start..].iter().collect()
}

fn window_split(sentence: &str, config: ChunkingConfig) -> Vec<String> {
    let step = config
        .size_chars
        .saturating_sub(config.overlap_chars)
        .max(1);
    let chars: Vec<char> = sentence.chars().collect();

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.size_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

/// Sentence-boundary-aware splitting with overlap carry. A sentence is only
/// fractured when it alone exceeds the target size, in which case it degrades
/// to fixed character windows.
pub fn chunk_page_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    if normalized.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    let mut flush = |current: &mut Vec<String>, current_len: &mut usize, chunks: &mut Vec<String>| {
        if !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            *current_len = 0;
        }
    };

    for sentence in split_sentences(&normalized) {
        let sentence_len = sentence.chars().count();

        if sentence_len > config.size_chars {
            flush(&mut current, &mut current_len, &mut chunks);
            chunks.extend(window_split(&sentence, config));
            continue;
        }

        if current.is_empty() || current_len + sentence_len + 1 <= config.size_chars {
            current_len += sentence_len + 1;
            current.push(sentence);
            continue;
        }

        flush(&mut current, &mut current_len, &mut chunks);

        // Carry the tail of the previous chunk so adjacent chunks overlap.
        let carry = chunks
            .last()
            .map(|chunk| tail_chars(chunk, config.overlap_chars))
            .unwrap_or_default();
        if !carry.is_empty() {
            current_len = carry.chars().count() + 1;
            current.push(carry);
        }
        current_len += sentence_len + 1;
        current.push(sentence);
    }

    flush(&mut current, &mut current_len, &mut chunks);

    chunks.retain(|chunk| !chunk.trim().is_empty());
    chunks
}

/// Builds the chunk records for one page. The chunk sequence restarts per
/// page, and every record carries its originating page number; a chunk never
/// spans two pages.
pub fn build_page_chunks(
    document: &SourceDocument,
    page: &Page,
    options: &IngestionOptions,
) -> Result<Vec<ChunkRecord>, IngestError> {
    let config = ChunkingConfig::from(options).validated()?;

    let records = chunk_page_text(&page.text, config)
        .into_iter()
        .enumerate()
        .map(|(sequence, text)| {
            let sequence = sequence as u64;
            ChunkRecord {
                chunk_id: derive_chunk_id(&document.doc_id, page.number, sequence),
                doc_id: document.doc_id.clone(),
                page_number: page.number,
                text,
                metadata: ChunkMetadata {
                    source_file: document.filename.clone(),
                    page_number: page.number,
                    chunk_index: sequence,
                    doc_title: document.filename.clone(),
                    checksum: document.checksum.clone(),
                    has_text_layer: page.has_text_layer,
                    ocr_applied: page.ocr_applied,
                    ocr_confidence: page.ocr_confidence,
                    vlm_used: page.ocr_applied,
                },
            }
        })
        .collect();

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            size_chars: size,
            overlap_chars: overlap,
        }
    }

    fn document() -> SourceDocument {
        SourceDocument {
            doc_id: "doc-1".to_string(),
            filename: "manual.pdf".to_string(),
            checksum: "abc".to_string(),
            page_count: 3,
        }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn sentences_keep_their_terminators() {
        let sentences = split_sentences("First one. Second one! Is this third? Tail without end");
        assert_eq!(
            sentences,
            vec![
                "First one.",
                "Second one!",
                "Is this third?",
                "Tail without end"
            ]
        );
    }

    #[test]
    fn sentences_are_not_fractured_across_chunks() {
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa lambda mu.";
        let chunks = chunk_page_text(text, config(50, 10));

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // Every chunk ends on a sentence boundary.
            assert!(chunk.ends_with('.'), "chunk fractured a sentence: {chunk}");
        }
    }

    #[test]
    fn adjacent_chunks_overlap() {
        let text = "One two three four five. Six seven eight nine ten. Eleven twelve thirteen.";
        let chunks = chunk_page_text(text, config(40, 12));

        assert!(chunks.len() >= 2);
        let carry = tail_chars(&chunks[0], 12);
        assert!(chunks[1].starts_with(&carry));
    }

    #[test]
    fn oversized_sentence_degrades_to_windows() {
        let sentence = "x".repeat(120);
        let chunks = chunk_page_text(&sentence, config(50, 10));

        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 50));
    }

    #[test]
    fn empty_page_text_produces_no_chunks() {
        assert!(chunk_page_text("   \n ", config(100, 10)).is_empty());
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        assert!(config(100, 100).validated().is_err());
        assert!(config(0, 0).validated().is_err());
        assert!(config(100, 20).validated().is_ok());
    }

    #[test]
    fn page_chunks_carry_page_number_and_stable_ids() -> Result<(), IngestError> {
        let page = Page {
            number: 2,
            text: "First sentence here. Second sentence here. Third sentence here.".to_string(),
            has_text_layer: true,
            ocr_applied: false,
            ocr_confidence: None,
        };
        let options = IngestionOptions {
            chunk_size_chars: 40,
            chunk_overlap_chars: 10,
            ..Default::default()
        };

        let first = build_page_chunks(&document(), &page, &options)?;
        let second = build_page_chunks(&document(), &page, &options)?;

        assert!(!first.is_empty());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
        }
        assert!(first.iter().all(|chunk| chunk.page_number == 2));
        assert!(first.iter().all(|chunk| chunk.metadata.page_number == 2));
        Ok(())
    }

    #[test]
    fn ocr_pages_mark_chunk_metadata() -> Result<(), IngestError> {
        let page = Page {
            number: 1,
            text: "Recovered by the vision model.".to_string(),
            has_text_layer: false,
            ocr_applied: true,
            ocr_confidence: Some(0.8),
        };

        let chunks = build_page_chunks(&document(), &page, &IngestionOptions::default())?;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].metadata.ocr_applied);
        assert!(chunks[0].metadata.vlm_used);
        assert_eq!(chunks[0].metadata.ocr_confidence, Some(0.8));
        Ok(())
    }
}
