use chrono::Utc;
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Append-only JSON-lines log of per-call summaries, one object per line.
/// `tail` returns records oldest-first (newest-last); unparsable lines are
/// skipped rather than failing the read.
pub struct JsonlLogger {
    path: PathBuf,
}

impl JsonlLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: Value) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut entry = json!({ "ts": Utc::now().to_rfc3339() });
        if let (Some(target), Some(source)) = (entry.as_object_mut(), record.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{entry}")?;
        Ok(())
    }

    pub fn tail(&self, limit: usize) -> Vec<Value> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };

        let records: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }
}
