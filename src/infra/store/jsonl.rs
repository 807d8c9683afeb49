//! File-backed store.
//!
//! Every mutation is appended to a JSON-lines operation log and replayed on
//! open, so a restarted broker sees exactly the state it last committed. The
//! log is rewritten as a snapshot once dead lines outnumber live keys.

use std::fs::{self, create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::memory::InMemoryStore;
use crate::core::{KvStore, QrmError};

/// Lines below this count are never compacted.
const COMPACT_MIN_LINES: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogRecord {
    Set { key: String, value: String },
    Delete { key: String },
    Scalar { key: String, value: String },
}

fn unavailable(err: impl std::fmt::Display) -> QrmError {
    QrmError::StoreUnavailable(err.to_string())
}

/// File-backed store using JSON lines for durability.
pub struct JsonlStore {
    path: PathBuf,
    stream: String,
    index: InMemoryStore,
    lines: usize,
}

impl JsonlStore {
    /// Open (or create) the store persisted under `path/stream.jsonl`.
    pub fn open(path: impl AsRef<Path>, stream: impl Into<String>) -> Result<Self, QrmError> {
        let path = path.as_ref().to_path_buf();
        let stream = stream.into();
        create_dir_all(&path).map_err(unavailable)?;
        let mut store = Self {
            path,
            stream,
            index: InMemoryStore::new(),
            lines: 0,
        };
        store.load_from_disk()?;
        tracing::info!(
            file = %store.file_path().display(),
            keys = store.index.len(),
            "opened file store"
        );
        Ok(store)
    }

    fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.jsonl", self.stream))
    }

    /// Replay the log. A final line cut short by a crash mid-append is
    /// dropped and truncated away; corruption anywhere else is an error.
    fn load_from_disk(&mut self) -> Result<(), QrmError> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(());
        }
        let bytes = fs::read(&file_path).map_err(unavailable)?;
        let mut offset = 0;
        let mut valid_len = 0;
        for line in bytes.split_inclusive(|b| *b == b'\n') {
            let start = offset;
            offset += line.len();
            let body = line.strip_suffix(b"\n").unwrap_or(line);
            if body.iter().all(u8::is_ascii_whitespace) {
                valid_len = offset;
                continue;
            }
            match serde_json::from_slice::<LogRecord>(body) {
                Ok(record) => {
                    self.apply_record(record)?;
                    self.lines += 1;
                    valid_len = offset;
                }
                Err(err) if offset == bytes.len() => {
                    tracing::warn!(
                        file = %file_path.display(),
                        at = start,
                        error = %err,
                        "dropping torn tail of store log"
                    );
                    break;
                }
                Err(err) => {
                    return Err(QrmError::Internal(format!(
                        "corrupt store log at byte {start}: {err}"
                    )));
                }
            }
        }
        self.repair_tail(&bytes, valid_len)
    }

    /// Cut a torn tail and make sure the next append starts on a fresh line.
    fn repair_tail(&self, bytes: &[u8], valid_len: usize) -> Result<(), QrmError> {
        if valid_len < bytes.len() {
            let file = OpenOptions::new()
                .write(true)
                .open(self.file_path())
                .map_err(unavailable)?;
            file.set_len(valid_len as u64).map_err(unavailable)?;
            file.sync_all().map_err(unavailable)?;
        }
        if valid_len > 0 && bytes[valid_len - 1] != b'\n' {
            let mut file = OpenOptions::new()
                .append(true)
                .open(self.file_path())
                .map_err(unavailable)?;
            writeln!(file).map_err(unavailable)?;
        }
        Ok(())
    }

    fn apply_record(&mut self, record: LogRecord) -> Result<(), QrmError> {
        match record {
            LogRecord::Set { key, value } => self.index.set(&key, value),
            LogRecord::Delete { key } => self.index.delete(&key),
            LogRecord::Scalar { key, value } => self.index.set_scalar(&key, value),
        }
    }

    fn append_to_disk(&mut self, record: &LogRecord) -> Result<(), QrmError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())
            .map_err(unavailable)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}").map_err(unavailable)?;
        self.lines += 1;
        Ok(())
    }

    /// Write the log before touching the index so a failed write changes nothing.
    fn commit(&mut self, record: LogRecord) -> Result<(), QrmError> {
        self.append_to_disk(&record)?;
        self.apply_record(record)?;
        self.maybe_compact()
    }

    fn maybe_compact(&mut self) -> Result<(), QrmError> {
        let live = self.index.len() + self.index.scalars().len();
        if self.lines < COMPACT_MIN_LINES || self.lines <= live * 2 {
            return Ok(());
        }
        self.rewrite_disk()
    }

    /// Replace the log with one line per live key.
    pub fn rewrite_disk(&mut self) -> Result<(), QrmError> {
        let file_path = self.file_path();
        let tmp_path = self.path.join(format!("{}.jsonl.tmp", self.stream));
        let mut records = Vec::new();
        for (key, value) in self.index.scalars() {
            records.push(LogRecord::Scalar {
                key: key.clone(),
                value: value.clone(),
            });
        }
        for (key, value) in self.index.ordered() {
            records.push(LogRecord::Set {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(unavailable)?;
            for record in &records {
                let line = serde_json::to_string(record)?;
                writeln!(file, "{line}").map_err(unavailable)?;
            }
            file.sync_all().map_err(unavailable)?;
        }
        fs::rename(&tmp_path, &file_path).map_err(unavailable)?;
        tracing::debug!(from = self.lines, to = records.len(), "compacted store log");
        self.lines = records.len();
        Ok(())
    }
}

impl KvStore for JsonlStore {
    fn get(&self, key: &str) -> Result<Option<String>, QrmError> {
        self.index.get(key)
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), QrmError> {
        self.commit(LogRecord::Set {
            key: key.to_string(),
            value,
        })
    }

    fn delete(&mut self, key: &str) -> Result<(), QrmError> {
        if self.index.get(key)?.is_none() {
            return Ok(());
        }
        self.commit(LogRecord::Delete {
            key: key.to_string(),
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<(String, String)>, QrmError> {
        self.index.list(prefix)
    }

    fn get_scalar(&self, key: &str) -> Result<Option<String>, QrmError> {
        self.index.get_scalar(key)
    }

    fn set_scalar(&mut self, key: &str, value: String) -> Result<(), QrmError> {
        self.commit(LogRecord::Scalar {
            key: key.to_string(),
            value,
        })
    }
}
