// ABOUTME: Persistence layer for sinitaivas, owning everything the streamer writes to disk.
// ABOUTME: Provides cursor checkpoints, the hour-partitioned NDJSON log, and resume-position recovery.

pub mod checkpoint;
pub mod layout;
pub mod partition;
pub mod recovery;

pub use checkpoint::{CheckpointEntry, CheckpointError, CheckpointStore, DEFAULT_CONSUMER};
pub use layout::{LayoutError, StorageLayout};
pub use partition::{PartitionError, PartitionKey, PartitionLog, WritePolicy};
pub use recovery::{
    RecoveryError, ResumePoint, ResumeSource, list_partitions, recover_last_position,
    resolve_resume_position,
};
