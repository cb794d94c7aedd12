//! Durable reading positions, one record per book
//!
//! The whole map is rewritten as one JSON document on every save. A
//! missing or unreadable file starts an empty store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::state::ReadingMode;

/// Where a book was left off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Character offset into the book's text
    pub position: usize,
    #[serde(default)]
    pub mode: ReadingMode,
    /// Unix time of the checkpoint in milliseconds
    #[serde(default)]
    pub timestamp: i64,
}

impl ProgressRecord {
    /// A record stamped with the current time
    pub fn now(position: usize, mode: ReadingMode) -> Self {
        Self {
            position,
            mode,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Errors writing the progress file
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("failed to encode progress: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Progress records backed by one JSON file
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    records: BTreeMap<String, ProgressRecord>,
}

impl ProgressStore {
    /// Read every record from `path`
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = read_records(&path);
        debug!(path = ?path, count = records.len(), "progress loaded");
        Self { path, records }
    }

    #[cfg(test)]
    pub fn records(&self) -> &BTreeMap<String, ProgressRecord> {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&ProgressRecord> {
        self.records.get(id)
    }

    /// Replace the record for `id` and rewrite the file
    pub fn save(&mut self, id: &str, record: ProgressRecord) -> Result<(), ProgressError> {
        self.records.insert(id.to_string(), record);

        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, json).map_err(|source| ProgressError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn read_records(path: &Path) -> BTreeMap<String, ProgressRecord> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(error = %e, path = ?path, "progress unreadable, starting empty");
            return BTreeMap::new();
        }
    };

    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(error = %e, path = ?path, "progress corrupt, starting empty");
        BTreeMap::new()
    })
}
