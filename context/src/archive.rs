//! Long-term archive of conversation turns.
//!
//! The [`ArchiveSink`] is a plain object store (get/put by key). Merge logic
//! lives in [`Archiver`]: a batch is appended to the JSON array already stored
//! under the same bot/day key instead of overwriting it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use thiserror::Error;

use dalibot_types::ChatMessage;

use crate::atomic_write::atomic_write;

/// Turns handed from a history buffer to the archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBatch {
    messages: Vec<ChatMessage>,
}

impl ArchiveBatch {
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Object key of one archive file: `{bot}/{YYYY-MM-DD}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveKey {
    bot: String,
    day: NaiveDate,
}

impl ArchiveKey {
    #[must_use]
    pub fn new(bot: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            bot: bot.into(),
            day,
        }
    }

    #[must_use]
    pub fn today(bot: impl Into<String>) -> Self {
        Self::new(bot, Utc::now().date_naive())
    }

    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    #[must_use]
    pub fn object_name(&self) -> String {
        format!("{}/{}.json", sanitize_segment(&self.bot), self.day.format("%Y-%m-%d"))
    }
}

impl std::fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.object_name())
    }
}

/// Keeps a bot name from escaping the archive root.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "bot".to_string()
    } else {
        cleaned.to_string()
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to read archive object {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write archive object {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("archive object {key} is not a JSON array: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize archive batch: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("archive storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable object storage for archive files.
pub trait ArchiveSink: Send + Sync {
    /// Returns `None` when nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArchiveError>;

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ArchiveError>;
}

/// Stores archive objects as files below a root directory.
#[derive(Debug, Clone)]
pub struct FsArchiveSink {
    root: PathBuf,
}

impl FsArchiveSink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ArchiveSink for FsArchiveSink {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArchiveError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        atomic_write(self.path_for(key), bytes).map_err(|source| ArchiveError::Write {
            key: key.to_string(),
            source,
        })
    }
}

/// Appends batches to the per-day archive of one bot.
pub struct Archiver {
    sink: Arc<dyn ArchiveSink>,
    bot_name: String,
    // Serializes read-merge-write so concurrent pushes cannot drop each other.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("bot_name", &self.bot_name)
            .finish_non_exhaustive()
    }
}

impl Archiver {
    #[must_use]
    pub fn new(sink: Arc<dyn ArchiveSink>, bot_name: impl Into<String>) -> Self {
        Self {
            sink,
            bot_name: bot_name.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    /// Merges `batch` into today's archive object.
    pub fn push_to_archive(&self, batch: &ArchiveBatch) -> Result<ArchiveKey, ArchiveError> {
        let key = ArchiveKey::today(&self.bot_name);
        self.push_at(&key, batch)?;
        Ok(key)
    }

    /// Merges `batch` into the object under `key`.
    ///
    /// Existing records are kept verbatim and the batch is appended after them.
    pub fn push_at(&self, key: &ArchiveKey, batch: &ArchiveBatch) -> Result<(), ArchiveError> {
        if batch.is_empty() {
            return Ok(());
        }

        let object = key.object_name();
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut records: Vec<serde_json::Value> = match self.sink.get(&object)? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| ArchiveError::Corrupt {
                    key: object.clone(),
                    source,
                })?
            }
            None => Vec::new(),
        };
        let existing = records.len();

        for message in batch.messages() {
            records.push(serde_json::to_value(message)?);
        }

        let bytes = serde_json::to_vec_pretty(&records)?;
        self.sink.put(&object, &bytes)?;

        tracing::info!(
            key = %object,
            existing,
            appended = batch.len(),
            "Archived conversation batch"
        );
        Ok(())
    }
}
