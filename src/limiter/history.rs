//! The bounded send-history log backing the rate limiter.
//!
//! Every successful send appends an immutable [`SendRecord`]. Only the most
//! recent records are retained in memory and rewritten to the history file;
//! the running total survives the truncation. A missing or corrupt file is
//! treated as empty history, never a startup failure.
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::Destination;

/// An immutable fact recording one successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRecord {
    /// When the message was sent.
    pub sent_at: DateTime<Utc>,
    /// Who it was sent to.
    pub destination: Destination,
    /// The first characters of the payload, for audit purposes.
    pub preview: String,
    /// Local hour of day at send time.
    pub hour: u32,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to write send history: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode send history: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    history: Vec<SendRecord>,
    total: u64,
    last_update: Option<DateTime<Utc>>,
}

pub(crate) struct SendHistory {
    records: Vec<SendRecord>,
    total: u64,
    keep: usize,
    path: Option<PathBuf>,
}

impl SendHistory {
    /// Loads history from `path`, keeping at most `keep` records in memory.
    pub(crate) fn load(path: Option<PathBuf>, keep: usize) -> Self {
        let (mut records, total) = match path.as_deref() {
            Some(path) => Self::read(path),
            None => (Vec::new(), 0),
        };
        if records.len() > keep {
            let overflow = records.len() - keep;
            records.drain(..overflow);
        }
        Self {
            records,
            total,
            keep,
            path,
        }
    }

    fn read(path: &Path) -> (Vec<SendRecord>, u64) {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(_) => return (Vec::new(), 0),
        };
        match serde_json::from_slice::<HistoryFile>(&bytes) {
            Ok(file) => (file.history, file.total),
            Err(err) => {
                tracing::warn!(
                    ?err,
                    path = %path.display(),
                    "Corrupt send history file, starting with empty history"
                );
                (Vec::new(), 0)
            }
        }
    }

    pub(crate) fn append(&mut self, record: SendRecord) {
        self.records.push(record);
        self.total += 1;
        if self.records.len() > self.keep {
            let overflow = self.records.len() - self.keep;
            self.records.drain(..overflow);
        }
    }

    /// Rewrites the history file with the retained records and running total.
    pub(crate) fn save(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = HistoryFile {
            history: self.records.clone(),
            total: self.total,
            last_update: Some(Utc::now()),
        };
        std::fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of retained records newer than `cutoff`.
    pub(crate) fn count_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.records
            .iter()
            .filter(|record| record.sent_at > cutoff)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn records(&self) -> &[SendRecord] {
        &self.records
    }

    /// Like [`SendHistory::count_since`] but scanning only the most recent
    /// `scan` records. Records older in the log than the scanned suffix are
    /// not counted even when they fall inside the window.
    pub(crate) fn count_since_scanning_last(&self, cutoff: DateTime<Utc>, scan: usize) -> usize {
        self.records
            .iter()
            .rev()
            .take(scan)
            .filter(|record| record.sent_at > cutoff)
            .count()
    }
}
