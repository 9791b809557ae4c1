// ABOUTME: Append-only NDJSON log partitioned by UTC date and hour.
// ABOUTME: Partitions are created lazily; write failures follow a configurable policy.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sinitaivas_core::DecodedRecord;
use sinitaivas_core::time::{to_date, to_date_and_hour};
use thiserror::Error;

/// File extension of every partition.
pub const PARTITION_EXTENSION: &str = "ndjson";

/// Errors that can occur while appending to a partition.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("io error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to do when a record cannot be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Log the record and keep going.
    #[default]
    LogAndContinue,
    /// Surface the error to the caller.
    Fatal,
}

/// The UTC date/hour window a partition covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    date: String,
    hour: String,
}

impl PartitionKey {
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            date: to_date(dt),
            hour: to_date_and_hour(dt),
        }
    }

    /// `YYYY-MM-DDTHH`
    pub fn hour(&self) -> &str {
        &self.hour
    }

    /// `<YYYY-MM-DD>/<YYYY-MM-DDTHH>.ndjson`
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.date).join(format!("{}.{}", self.hour, PARTITION_EXTENSION))
    }
}

/// Writer over the partition tree rooted at one directory. Keeps the most
/// recently used partition open until the key changes.
pub struct PartitionLog {
    root: PathBuf,
    policy: WritePolicy,
    active: Option<(PartitionKey, File)>,
}

impl PartitionLog {
    /// Open the log rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path, policy: WritePolicy) -> Result<Self, PartitionError> {
        fs::create_dir_all(root).map_err(|source| PartitionError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            policy,
            active: None,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn path_for(&self, key: &PartitionKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Append `record` as one line of the partition for `key`.
    ///
    /// Under [`WritePolicy::LogAndContinue`] a failure is logged with the
    /// record and filename and `Ok(())` is returned.
    pub fn append(&mut self, record: &DecodedRecord, key: &PartitionKey) -> Result<(), PartitionError> {
        match self.try_append(record, key) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Drop the handle so the next append reopens the partition.
                self.active = None;
                let file = self.path_for(key);
                tracing::error!(
                    file = %file.display(),
                    sequence = ?record.sequence(),
                    record = ?record.as_map(),
                    error = %e,
                    "failed to write record to partition"
                );
                match self.policy {
                    WritePolicy::LogAndContinue => Ok(()),
                    WritePolicy::Fatal => Err(e),
                }
            }
        }
    }

    fn try_append(&mut self, record: &DecodedRecord, key: &PartitionKey) -> Result<(), PartitionError> {
        let line = serde_json::to_string(record)?;
        let path = self.path_for(key);
        let file = self.file_for(key, &path)?;
        writeln!(file, "{}", line).map_err(|source| PartitionError::Io { path, source })
    }

    fn file_for(&mut self, key: &PartitionKey, path: &Path) -> Result<&mut File, PartitionError> {
        let reuse = matches!(&self.active, Some((active, _)) if active == key);
        if !reuse {
            let io_err = |source| PartitionError::Io {
                path: path.to_path_buf(),
                source,
            };
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(io_err)?;
            tracing::debug!(file = %path.display(), "opened partition");
            self.active = Some((key.clone(), file));
        }

        match &mut self.active {
            Some((_, file)) => Ok(file),
            None => Err(PartitionError::Io {
                path: path.to_path_buf(),
                source: io::Error::other("partition handle missing"),
            }),
        }
    }

    /// Flush the active partition to disk.
    pub fn sync(&mut self) -> Result<(), PartitionError> {
        let Some((key, file)) = &self.active else {
            return Ok(());
        };

        if let Err(source) = file.sync_data() {
            let e = PartitionError::Io {
                path: self.root.join(key.relative_path()),
                source,
            };
            tracing::error!(error = %e, "failed to sync partition");
            self.active = None;
            if self.policy == WritePolicy::Fatal {
                return Err(e);
            }
        }
        Ok(())
    }
}
