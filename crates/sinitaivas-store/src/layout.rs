// ABOUTME: Filesystem layout of the streamer's home directory.
// ABOUTME: Places the partition tree and the checkpoint document and opens stores over them.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::checkpoint::CheckpointStore;
use crate::partition::{PartitionError, PartitionLog, WritePolicy};

/// Directory under the home that holds the partition tree.
pub const STREAM_DIR: &str = "firehose_stream";

/// Checkpoint document file name under the home.
pub const CHECKPOINT_FILE: &str = "cursors.json";

/// Errors that can occur while preparing the storage layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),
}

/// The streamer's home directory layout:
///
/// ```text
/// <home>/cursors.json
/// <home>/firehose_stream/<YYYY-MM-DD>/<YYYY-MM-DDTHH>.ndjson
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    home: PathBuf,
}

impl StorageLayout {
    /// Create the layout rooted at `home`, creating the partition directory.
    pub fn new(home: PathBuf) -> Result<Self, LayoutError> {
        fs::create_dir_all(home.join(STREAM_DIR))?;
        Ok(Self { home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn stream_dir(&self) -> PathBuf {
        self.home.join(STREAM_DIR)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.home.join(CHECKPOINT_FILE)
    }

    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(self.checkpoint_path())
    }

    pub fn partition_log(&self, policy: WritePolicy) -> Result<PartitionLog, LayoutError> {
        Ok(PartitionLog::open(&self.stream_dir(), policy)?)
    }
}
