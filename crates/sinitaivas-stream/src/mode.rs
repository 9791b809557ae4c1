// ABOUTME: Operating modes: start fresh from the live tip or resume from a recovered position.
// ABOUTME: Resolves the initial subscription cursor for a consumer.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use sinitaivas_store::{CheckpointStore, resolve_resume_position};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("Only fresh and resume modes are supported, got {0:?}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Drop this consumer's checkpoint and start at the live tip.
    #[default]
    Fresh,
    /// Continue from the checkpoint, or from the newest partition.
    Resume,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Fresh => "fresh",
            Mode::Resume => "resume",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fresh" => Ok(Mode::Fresh),
            "resume" => Ok(Mode::Resume),
            other => Err(ModeError::Unsupported(other.to_string())),
        }
    }
}

/// The cursor the first subscription should use.
///
/// `Fresh` clears only `consumer`'s checkpoint entry and returns `None`.
/// `Resume` returns the checkpointed position when one exists, otherwise the
/// last sequence found in the partitions under `stream_root`.
pub fn start_position(
    mode: Mode,
    checkpoints: &CheckpointStore,
    stream_root: &Path,
    consumer: &str,
) -> Option<u64> {
    match mode {
        Mode::Fresh => {
            checkpoints.reset(consumer);
            tracing::info!(consumer, "starting fresh from the live stream");
            None
        }
        Mode::Resume => {
            let point = resolve_resume_position(checkpoints, stream_root, consumer);
            tracing::info!(
                consumer,
                position = point.position,
                source = ?point.source,
                "resuming stream"
            );
            Some(point.position)
        }
    }
}
