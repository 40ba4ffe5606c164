use crate::error::IngestError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Hex SHA-256 of a file's content; drives skip/reprocess decisions.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Persisted map from relative source path to last-ingested content checksum.
///
/// Single source of truth for "has this file changed". Mutated only by the
/// ingest orchestrator while it holds the run lock; an unreadable file on disk
/// is treated as an empty index, which forces a full re-ingest on the next run.
#[derive(Debug)]
pub struct ChecksumIndex {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl ChecksumIndex {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(parsed) => parsed,
                Err(error) => {
                    warn!(path = %path.display(), %error, "checksum index unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self { path, entries }
    }

    pub fn lookup(&self, relative_path: &str) -> Option<&str> {
        self.entries.get(relative_path).map(String::as_str)
    }

    pub fn update(&mut self, relative_path: &str, checksum: &str) {
        self.entries
            .insert(relative_path.to_string(), checksum.to_string());
    }

    /// Used by force re-ingest: every file reprocesses regardless of content.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn persist(&self) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
