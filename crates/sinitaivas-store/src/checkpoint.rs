// ABOUTME: Durable cursor checkpoints, one entry per named consumer, in a small JSON document.
// ABOUTME: Reads never fail and writes are atomic and best-effort, so checkpointing never stops ingestion.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sinitaivas_core::Outcome;
use sinitaivas_core::time::to_zulu;
use thiserror::Error;

/// Checkpoint entry name used by the streamer unless configured otherwise.
pub const DEFAULT_CONSUMER: &str = "streamer";

/// Errors that can occur while reading or writing the checkpoint document.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint document is not a json object")]
    NotAnObject,
}

/// One consumer's stored position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub cursor: u64,
    pub updated_at: String,
}

/// Checkpoint document at a fixed path. Entries belonging to other consumers
/// are carried through every rewrite untouched.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole document. A missing, unreadable, or malformed file
    /// yields an empty document.
    pub fn read(&self) -> Map<String, Value> {
        match self.try_read() {
            Ok(document) => document,
            Err(CheckpointError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(file = %self.path.display(), "no checkpoint file yet");
                Map::new()
            }
            Err(e) => {
                tracing::warn!(
                    file = %self.path.display(),
                    error = %e,
                    "failed to read checkpoint file, treating as empty"
                );
                Map::new()
            }
        }
    }

    fn try_read(&self) -> Result<Map<String, Value>, CheckpointError> {
        let contents = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Value>(&contents)? {
            Value::Object(document) => Ok(document),
            _ => Err(CheckpointError::NotAnObject),
        }
    }

    /// The stored entry for `consumer`, if present and well-formed.
    pub fn entry(&self, consumer: &str) -> Option<CheckpointEntry> {
        let value = self.read().remove(consumer)?;
        match serde_json::from_value::<CheckpointEntry>(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(
                    file = %self.path.display(),
                    consumer,
                    error = %e,
                    "ignoring malformed checkpoint entry"
                );
                None
            }
        }
    }

    /// The stored cursor for `consumer`.
    pub fn position(&self, consumer: &str) -> Option<u64> {
        self.entry(consumer).map(|entry| entry.cursor)
    }

    /// Record `position` as the last processed sequence for `consumer`.
    pub fn advance(&self, position: u64, consumer: &str) -> Outcome<()> {
        self.advance_at(position, consumer, &Utc::now())
    }

    /// [`advance`](Self::advance) with an explicit update time.
    pub fn advance_at(&self, position: u64, consumer: &str, now: &DateTime<Utc>) -> Outcome<()> {
        let entry = CheckpointEntry {
            cursor: position,
            updated_at: to_zulu(now),
        };

        let mut document = self.read();
        match serde_json::to_value(&entry) {
            Ok(value) => {
                document.insert(consumer.to_string(), value);
            }
            Err(e) => return self.write_failed("update", e.into()),
        }

        match self.write(&document) {
            Ok(()) => Outcome::complete(()),
            Err(e) => self.write_failed("update", e),
        }
    }

    /// Remove the entry for `consumer`, leaving every other entry in place.
    pub fn reset(&self, consumer: &str) -> Outcome<()> {
        let mut document = self.read();
        document.remove(consumer);

        match self.write(&document) {
            Ok(()) => {
                tracing::info!(file = %self.path.display(), consumer, "checkpoint reset");
                Outcome::complete(())
            }
            Err(e) => self.write_failed("reset", e),
        }
    }

    fn write_failed(&self, op: &str, e: CheckpointError) -> Outcome<()> {
        tracing::error!(
            file = %self.path.display(),
            error = %e,
            "failed to {} checkpoint file",
            op
        );
        Outcome::degraded((), format!("checkpoint {} failed: {}", op, e))
    }

    /// Write the document atomically (temp file, fsync, rename, fsync of the
    /// parent directory). A failed write leaves no temp file behind.
    fn write(&self, document: &Map<String, Value>) -> Result<(), CheckpointError> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(document)?;
        let tmp_path = self.tmp_path();

        if let Err(e) = Self::replace(&tmp_path, &self.path, json.as_bytes()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        // Best-effort: the rename already succeeded, so the document is consistent.
        if let Some(parent) = parent
            && let Ok(dir) = File::open(parent)
        {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    fn replace(tmp_path: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = File::create(tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(tmp_path, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("cursors.json"))
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).read().is_empty());
        assert_eq!(store(&dir).position(DEFAULT_CONSUMER), None);
    }

    #[test]
    fn corrupt_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let checkpoints = store(&dir);
        fs::write(checkpoints.path(), "{\"streamer\": {\"cursor\": 1").unwrap();
        assert!(checkpoints.read().is_empty());

        fs::write(checkpoints.path(), "[1, 2, 3]").unwrap();
        assert!(checkpoints.read().is_empty());
    }

    #[test]
    fn advance_writes_cursor_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let checkpoints = store(&dir);
        let now = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();

        let outcome = checkpoints.advance_at(123, DEFAULT_CONSUMER, &now);
        assert!(!outcome.is_degraded());

        let raw: Value = serde_json::from_str(&fs::read_to_string(checkpoints.path()).unwrap())
            .unwrap();
        assert_eq!(
            raw,
            json!({"streamer": {"cursor": 123, "updated_at": "2025-02-03T04:05:06.000000Z"}})
        );
        assert_eq!(checkpoints.position(DEFAULT_CONSUMER), Some(123));
    }

    #[test]
    fn advance_preserves_other_consumers() {
        let dir = TempDir::new().unwrap();
        let checkpoints = store(&dir);
        fs::write(
            checkpoints.path(),
            r#"{"backfill": {"cursor": 7, "updated_at": "x", "note": "keep me"}}"#,
        )
        .unwrap();

        checkpoints.advance(50, DEFAULT_CONSUMER);
        checkpoints.advance(51, DEFAULT_CONSUMER);

        let document = checkpoints.read();
        assert_eq!(
            document["backfill"],
            json!({"cursor": 7, "updated_at": "x", "note": "keep me"})
        );
        assert_eq!(checkpoints.position(DEFAULT_CONSUMER), Some(51));
    }

    #[test]
    fn reset_removes_only_the_named_entry() {
        let dir = TempDir::new().unwrap();
        let checkpoints = store(&dir);
        checkpoints.advance(10, "backfill");
        checkpoints.advance(20, DEFAULT_CONSUMER);

        let outcome = checkpoints.reset(DEFAULT_CONSUMER);
        assert!(!outcome.is_degraded());

        assert_eq!(checkpoints.position(DEFAULT_CONSUMER), None);
        assert_eq!(checkpoints.position("backfill"), Some(10));
    }

    #[test]
    fn reset_without_file_creates_empty_document() {
        let dir = TempDir::new().unwrap();
        let checkpoints = store(&dir);
        checkpoints.reset(DEFAULT_CONSUMER);
        assert_eq!(fs::read_to_string(checkpoints.path()).unwrap(), "{}");
    }

    #[test]
    fn malformed_entry_is_ignored() {
        let dir = TempDir::new().unwrap();
        let checkpoints = store(&dir);
        fs::write(checkpoints.path(), r#"{"streamer": {"cursor": -4}}"#).unwrap();
        assert_eq!(checkpoints.position(DEFAULT_CONSUMER), None);
    }

    #[test]
    fn write_failure_degrades_instead_of_failing() {
        let dir = TempDir::new().unwrap();
        // A directory where the checkpoint file should be makes the rename fail.
        let path = dir.path().join("cursors.json");
        fs::create_dir_all(path.join("occupied")).unwrap();
        let checkpoints = CheckpointStore::new(&path);

        let outcome = checkpoints.advance(5, DEFAULT_CONSUMER);
        assert!(outcome.is_degraded());
        assert!(outcome.reasons()[0].contains("checkpoint update failed"));
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursors.json");
        fs::create_dir_all(path.join("occupied")).unwrap();
        let checkpoints = CheckpointStore::new(&path);

        assert!(checkpoints.advance(5, DEFAULT_CONSUMER).is_degraded());
        assert!(checkpoints.reset(DEFAULT_CONSUMER).is_degraded());

        assert!(!checkpoints.tmp_path().exists());
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["cursors.json".to_string()]);
    }

    #[test]
    fn successful_write_leaves_only_the_document() {
        let dir = TempDir::new().unwrap();
        let checkpoints = store(&dir);
        checkpoints.advance(1, DEFAULT_CONSUMER);
        checkpoints.advance(2, DEFAULT_CONSUMER);

        assert!(!checkpoints.tmp_path().exists());
        assert_eq!(checkpoints.position(DEFAULT_CONSUMER), Some(2));
    }
}
