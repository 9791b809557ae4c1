// ABOUTME: Resume-position recovery from the checkpoint document or the newest log partition.
// ABOUTME: The partition scan reads only the tail of the last file to find the final sequence.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::checkpoint::CheckpointStore;
use crate::partition::PARTITION_EXTENSION;

/// Bytes read per step while scanning a partition backwards.
const TAIL_CHUNK: u64 = 8 * 1024;

/// Errors that can occur while reading a partition's last record.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("last record has no integer sequence field")]
    MissingSequence,
}

/// Where a resume position came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    Checkpoint,
    PartitionScan,
}

/// The resolved starting point for a resumed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub position: u64,
    pub source: ResumeSource,
}

/// All partition files one directory below `root`, in lexicographic order.
/// Because partitions are named `YYYY-MM-DD/YYYY-MM-DDTHH.ndjson` this is
/// chronological order.
pub fn list_partitions(root: &Path) -> Result<Vec<PathBuf>, io::Error> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut partitions = Vec::new();
    for day in fs::read_dir(root)? {
        let day = day?.path();
        if !day.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&day)? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == PARTITION_EXTENSION) {
                partitions.push(path);
            }
        }
    }

    partitions.sort();
    Ok(partitions)
}

/// The `sequence` of the last record in the newest partition, or 0 when
/// there are no partitions or the last line cannot be read.
pub fn recover_last_position(root: &Path) -> u64 {
    let partitions = match list_partitions(root) {
        Ok(partitions) => partitions,
        Err(e) => {
            tracing::error!(root = %root.display(), error = %e, "failed to list partitions");
            return 0;
        }
    };

    let Some(latest) = partitions.last() else {
        tracing::warn!(root = %root.display(), "no partition files found");
        return 0;
    };

    match last_sequence(latest) {
        Ok(Some(sequence)) => sequence,
        Ok(None) => {
            tracing::warn!(file = %latest.display(), "latest partition is empty");
            0
        }
        Err(e) => {
            tracing::error!(
                file = %latest.display(),
                error = %e,
                "failed to read last sequence from partition"
            );
            0
        }
    }
}

/// Resolve where a resumed run should start. A checkpoint entry for
/// `consumer` wins whenever it exists; otherwise the newest partition is
/// scanned.
pub fn resolve_resume_position(
    checkpoints: &CheckpointStore,
    partitions_root: &Path,
    consumer: &str,
) -> ResumePoint {
    if let Some(position) = checkpoints.position(consumer) {
        return ResumePoint {
            position,
            source: ResumeSource::Checkpoint,
        };
    }

    tracing::info!(consumer, "no checkpoint entry, scanning partitions");
    ResumePoint {
        position: recover_last_position(partitions_root),
        source: ResumeSource::PartitionScan,
    }
}

fn last_sequence(path: &Path) -> Result<Option<u64>, RecoveryError> {
    let Some(line) = read_last_line(path)? else {
        return Ok(None);
    };

    let record: Value = serde_json::from_str(&line)?;
    record
        .get("sequence")
        .and_then(Value::as_u64)
        .map(Some)
        .ok_or(RecoveryError::MissingSequence)
}

/// Read the final non-empty line of a file by walking backwards from its end.
fn read_last_line(path: &Path) -> Result<Option<String>, io::Error> {
    let mut file = File::open(path)?;
    let mut end = file.metadata()?.len();
    let mut tail: Vec<u8> = Vec::new();

    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK);
        let mut chunk = vec![0u8; (end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&tail);
        tail = chunk;
        end = start;

        let trimmed = trim_line_endings(&tail);
        if let Some(newline) = trimmed.iter().rposition(|b| *b == b'\n') {
            return Ok(Some(String::from_utf8_lossy(&trimmed[newline + 1..]).into_owned()));
        }
    }

    let trimmed = trim_line_endings(&tail);
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(trimmed).into_owned()))
    }
}

fn trim_line_endings(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::DEFAULT_CONSUMER;
    use tempfile::TempDir;

    fn write_partition(root: &Path, date: &str, hour: &str, contents: &str) -> PathBuf {
        let dir = root.join(date);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.ndjson", hour));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn no_partitions_recovers_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(recover_last_position(dir.path()), 0);
        assert_eq!(recover_last_position(&dir.path().join("missing")), 0);
    }

    #[test]
    fn single_line_partition_round_trips_sequence() {
        let dir = TempDir::new().unwrap();
        write_partition(
            dir.path(),
            "2025-01-01",
            "2025-01-01T00",
            "{\"sequence\": 456, \"author\": \"did:plc:x\"}\n",
        );
        assert_eq!(recover_last_position(dir.path()), 456);
    }

    #[test]
    fn newest_partition_across_dates_wins() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "2024-12-31", "2024-12-31T23", "{\"sequence\": 900}\n");
        write_partition(
            dir.path(),
            "2025-01-01",
            "2025-01-01T00",
            "{\"sequence\": 1000}\n{\"sequence\": 1001}\n",
        );
        write_partition(dir.path(), "2025-01-01", "2025-01-01T09", "{\"sequence\": 1002}\n");
        fs::write(dir.path().join("2025-01-01").join("notes.txt"), "ignored").unwrap();

        let partitions = list_partitions(dir.path()).unwrap();
        assert_eq!(partitions.len(), 3);
        assert!(partitions[2].ends_with("2025-01-01/2025-01-01T09.ndjson"));
        assert_eq!(recover_last_position(dir.path()), 1002);
    }

    #[test]
    fn empty_or_unparseable_last_partition_recovers_zero() {
        let dir = TempDir::new().unwrap();
        write_partition(dir.path(), "2025-01-01", "2025-01-01T00", "{\"sequence\": 5}\n");
        write_partition(dir.path(), "2025-01-01", "2025-01-01T01", "");
        assert_eq!(recover_last_position(dir.path()), 0);

        write_partition(
            dir.path(),
            "2025-01-01",
            "2025-01-01T02",
            "{\"sequence\": 6}\n{\"sequence\": 7, \"trunc",
        );
        assert_eq!(recover_last_position(dir.path()), 0);

        write_partition(dir.path(), "2025-01-01", "2025-01-01T03", "{\"author\": \"x\"}\n");
        assert_eq!(recover_last_position(dir.path()), 0);
    }

    #[test]
    fn last_line_spanning_chunks_is_read_whole() {
        let dir = TempDir::new().unwrap();
        let padding = "x".repeat(3 * TAIL_CHUNK as usize);
        let contents = format!(
            "{{\"sequence\": 1}}\n{{\"sequence\": 2, \"text\": \"{}\"}}\n\n",
            padding
        );
        let path = write_partition(dir.path(), "2025-01-01", "2025-01-01T00", &contents);

        assert_eq!(last_sequence(&path).unwrap(), Some(2));
    }

    #[test]
    fn checkpoint_takes_precedence_over_scan() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("firehose_stream");
        write_partition(&root, "2025-01-01", "2025-01-01T00", "{\"sequence\": 99}\n");
        let checkpoints = CheckpointStore::new(dir.path().join("cursors.json"));

        let scanned = resolve_resume_position(&checkpoints, &root, DEFAULT_CONSUMER);
        assert_eq!(
            scanned,
            ResumePoint {
                position: 99,
                source: ResumeSource::PartitionScan
            }
        );

        checkpoints.advance(42, DEFAULT_CONSUMER);
        let resumed = resolve_resume_position(&checkpoints, &root, DEFAULT_CONSUMER);
        assert_eq!(
            resumed,
            ResumePoint {
                position: 42,
                source: ResumeSource::Checkpoint
            }
        );

        // Resolving again without new input reproduces the same position.
        assert_eq!(resolve_resume_position(&checkpoints, &root, DEFAULT_CONSUMER), resumed);
    }
}
