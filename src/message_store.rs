use std::fs;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("message log {path} is corrupt: {source}")]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not persist message log: {0}")]
    Io(#[from] io::Error),
}

/// A committed chat message. `sequence` is its 0-based position in the log
/// and stays stable for the lifetime of the store file.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub author: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub sequence: usize,
}

// On-disk record. `sequence` is implicit in array position, so the file
// only carries the three payload fields.
#[derive(Serialize, Deserialize)]
struct MessageRecord {
    author: String,
    body: String,
    timestamp: DateTime<Utc>,
}

/// Append-only log of chat messages, backed by a single JSON file.
///
/// The full log lives in memory behind an `Arc` that is only ever replaced
/// wholesale, so `list` hands out a snapshot without blocking a write in
/// progress. Appends are serialized through `writer` and hit the disk via a
/// write-temp-then-rename protocol: a crash mid-write leaves either the old
/// complete file or the new complete file, never a truncated one.
pub struct MessageStore {
    path: PathBuf,
    log: RwLock<Arc<Vec<Message>>>,
    writer: Mutex<()>,
}

impl MessageStore {
    /// Open the store at `path`, loading the log into memory.
    ///
    /// A missing file is the normal first-run state and yields an empty
    /// log; the file is created by the first `append`. An existing file
    /// that does not parse as a message log is surfaced as
    /// `StoreError::CorruptStore` rather than being treated as empty.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<MessageStore, StoreError> {
        let path = path.into();
        let messages = match fs::read_to_string(&path) {
            Ok(data) if data.trim().is_empty() => Vec::new(),
            Ok(data) => {
                let records: Vec<MessageRecord> =
                    serde_json::from_str(&data).map_err(|source| StoreError::CorruptStore {
                        path: path.clone(),
                        source,
                    })?;
                records
                    .into_iter()
                    .enumerate()
                    .map(|(sequence, record)| Message {
                        author: record.author,
                        body: record.body,
                        timestamp: record.timestamp,
                        sequence,
                    })
                    .collect()
            }
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };

        Ok(MessageStore {
            path,
            log: RwLock::new(Arc::new(messages)),
            writer: Mutex::new(()),
        })
    }

    /// Append a message and durably persist the new log state.
    ///
    /// Both inputs are trimmed; either being empty afterwards is a
    /// `StoreError::Validation`. The write hits the disk before the
    /// in-memory log is swapped, so a failed persist leaves memory at the
    /// last known-durable state and the error goes back to the caller.
    pub fn append(&self, author: &str, body: &str) -> Result<Message, StoreError> {
        let author = author.trim();
        let body = body.trim();
        if author.is_empty() {
            return Err(StoreError::Validation(String::from(
                "author must not be empty",
            )));
        }
        if body.is_empty() {
            return Err(StoreError::Validation(String::from(
                "body must not be empty",
            )));
        }

        // One append in flight at a time; readers are not held up.
        let _writer = self.writer.lock().expect("message store writer poisoned");

        let current = Arc::clone(&self.log.read().expect("message log lock poisoned"));

        // Clamp against a wall clock stepping backwards so timestamps stay
        // non-decreasing in log order.
        let mut timestamp = Utc::now();
        if let Some(last) = current.last() {
            if last.timestamp > timestamp {
                timestamp = last.timestamp;
            }
        }

        let message = Message {
            author: author.to_owned(),
            body: body.to_owned(),
            timestamp,
            sequence: current.len(),
        };

        let mut next = (*current).clone();
        next.push(message.clone());
        self.persist(&next)?;

        *self.log.write().expect("message log lock poisoned") = Arc::new(next);
        Ok(message)
    }

    /// Snapshot of the full log in insertion order. Cannot fail once the
    /// store is open: corruption of the durable file is caught by `open`.
    pub fn list(&self) -> Vec<Message> {
        let snapshot = Arc::clone(&self.log.read().expect("message log lock poisoned"));
        (*snapshot).clone()
    }

    fn persist(&self, messages: &[Message]) -> Result<(), StoreError> {
        let records: Vec<MessageRecord> = messages
            .iter()
            .map(|m| MessageRecord {
                author: m.author.clone(),
                body: m.body.clone(),
                timestamp: m.timestamp,
            })
            .collect();
        let data = serde_json::to_string_pretty(&records).map_err(io::Error::from)?;

        // Write the new log beside the live file and rename it into place.
        // The fsync makes sure the rename never publishes a file whose
        // contents are still in the page cache alone.
        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(data.as_bytes())?;
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
