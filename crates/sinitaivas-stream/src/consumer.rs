// ABOUTME: The stream consumer: pulls events, decodes commits, appends records, and checkpoints.
// ABOUTME: Reconnects from the last processed sequence under a bounded retry policy.

use chrono::Utc;
use futures::StreamExt;
use sinitaivas_core::{BlockDecoder, Commit, RecordDecoder};
use sinitaivas_store::{CheckpointStore, PartitionError, PartitionKey, PartitionLog};
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::source::{EventSource, SourceError, StreamEvent};

/// Errors that end a streaming attempt or the whole run.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("event source error: {0}")]
    Source(#[from] SourceError),

    #[error("partition write error: {0}")]
    Storage(#[from] PartitionError),

    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        source: Box<ConsumerError>,
    },
}

impl ConsumerError {
    /// Source failures are worth reconnecting for; a write error under the
    /// fatal policy and exhaustion are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConsumerError::Source(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Streaming,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub commits_processed: u64,
    pub records_written: u64,
    pub events_skipped: u64,
    pub degraded_records: u64,
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Processed { sequence: u64, records: usize },
    Skipped,
}

/// Consumes one event source into a partition log, checkpointing after
/// every commit.
pub struct Consumer<S, D> {
    source: S,
    decoder: RecordDecoder<D>,
    log: PartitionLog,
    checkpoints: CheckpointStore,
    name: String,
    position: Option<u64>,
    state: ConsumerState,
    stats: ConsumerStats,
}

impl<S: EventSource, D: BlockDecoder> Consumer<S, D> {
    pub fn new(
        source: S,
        decoder: RecordDecoder<D>,
        log: PartitionLog,
        checkpoints: CheckpointStore,
        name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            decoder,
            log,
            checkpoints,
            name: name.into(),
            position: None,
            state: ConsumerState::Disconnected,
            stats: ConsumerStats::default(),
        }
    }

    /// Start from `position` instead of the live tip.
    pub fn starting_at(mut self, position: Option<u64>) -> Self {
        self.position = position;
        self
    }

    /// The last processed sequence, which is also the next subscription cursor.
    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run [`stream_once`](Self::stream_once) until it ends cleanly, fails
    /// with a non-retryable error, or the attempt budget is spent. Returns
    /// the number of attempts used.
    pub async fn run_with_retry(&mut self, policy: &RetryPolicy) -> Result<u32, ConsumerError> {
        let mut attempt = 1;
        tracing::info!(
            consumer = %self.name,
            cursor = ?self.position,
            max_attempts = policy.max_attempts,
            "starting stream"
        );

        loop {
            match self.stream_once().await {
                Ok(()) => {
                    tracing::info!(
                        consumer = %self.name,
                        attempt,
                        position = ?self.position,
                        stats = ?self.stats,
                        "stream ended"
                    );
                    return Ok(attempt);
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(
                        consumer = %self.name,
                        attempt,
                        position = ?self.position,
                        error = %e,
                        "stream failed with a non-retryable error"
                    );
                    return Err(e);
                }
                Err(e) if policy.should_retry(attempt) => {
                    let wait = policy.delay_after(attempt);
                    tracing::error!(
                        consumer = %self.name,
                        attempt,
                        max_attempts = policy.max_attempts,
                        wait_secs = wait.as_secs_f64(),
                        position = ?self.position,
                        error = %e,
                        "stream attempt failed, reconnecting"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        consumer = %self.name,
                        attempts = attempt,
                        position = ?self.position,
                        error = %e,
                        "retry budget exhausted"
                    );
                    return Err(ConsumerError::Exhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// Subscribe from the current position and handle events until the
    /// source ends or fails.
    pub async fn stream_once(&mut self) -> Result<(), ConsumerError> {
        self.state = ConsumerState::Disconnected;

        let mut events = match self.source.subscribe(self.position).await {
            Ok(events) => events,
            Err(e) => {
                self.state = ConsumerState::Failed;
                return Err(e.into());
            }
        };
        self.state = ConsumerState::Streaming;

        while let Some(item) = events.next().await {
            let result = match item {
                Ok(event) => self.handle_event(event).map(|_| ()),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                self.state = ConsumerState::Failed;
                return Err(e);
            }
        }

        self.state = ConsumerState::Disconnected;
        Ok(())
    }

    /// Handle one event to completion: decode, append, fsync, checkpoint.
    pub fn handle_event(&mut self, event: StreamEvent) -> Result<Disposition, ConsumerError> {
        let commit = match event {
            StreamEvent::Commit(commit) => commit,
            StreamEvent::Other { kind, sequence } => {
                tracing::debug!(kind = %kind, sequence = ?sequence, "skipping non-commit event");
                self.stats.events_skipped += 1;
                return Ok(Disposition::Skipped);
            }
            StreamEvent::Malformed { reason } => {
                tracing::warn!(reason = %reason, "skipping invalid commit frame");
                self.stats.events_skipped += 1;
                return Ok(Disposition::Skipped);
            }
        };

        if !commit.has_blocks() {
            tracing::warn!(
                sequence = commit.sequence,
                repository = %commit.repository_id,
                "skipping invalid commit: no blocks"
            );
            self.stats.events_skipped += 1;
            return Ok(Disposition::Skipped);
        }

        let records = self.process_commit(&commit)?;
        Ok(Disposition::Processed {
            sequence: commit.sequence,
            records,
        })
    }

    fn process_commit(&mut self, commit: &Commit) -> Result<usize, ConsumerError> {
        if let Some(last) = self.position
            && commit.sequence < last
        {
            tracing::warn!(
                sequence = commit.sequence,
                last_sequence = last,
                "commit sequence went backwards"
            );
        }

        let now = Utc::now();
        let key = PartitionKey::from_datetime(&now);
        let outcomes = self.decoder.decode_at(commit, &now);
        let written = outcomes.len();

        for outcome in &outcomes {
            if outcome.is_degraded() {
                self.stats.degraded_records += 1;
                tracing::warn!(
                    sequence = commit.sequence,
                    uri = ?outcome.value().get("uri"),
                    reasons = ?outcome.reasons(),
                    "record degraded"
                );
            }
            self.log.append(outcome.value(), &key)?;
        }
        if written > 0 {
            self.log.sync()?;
        }

        self.checkpoints.advance(commit.sequence, &self.name);
        self.position = Some(commit.sequence);
        self.stats.commits_processed += 1;
        self.stats.records_written += written as u64;

        tracing::debug!(
            sequence = commit.sequence,
            records = written,
            partition = %key.hour(),
            "commit processed"
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::CarBlockDecoder;
    use crate::testing::{Connection, ScriptedSource, block_cid, car, post_commit, record_block};
    use sinitaivas_store::{WritePolicy, list_partitions};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const CONSUMER: &str = "streamer";

    fn consumer(
        dir: &TempDir,
        script: Vec<Connection>,
        policy: WritePolicy,
    ) -> Consumer<ScriptedSource, CarBlockDecoder> {
        Consumer::new(
            ScriptedSource::new(script),
            RecordDecoder::new(CarBlockDecoder),
            PartitionLog::open(&dir.path().join("firehose_stream"), policy).unwrap(),
            CheckpointStore::new(dir.path().join("cursors.json")),
            CONSUMER,
        )
    }

    fn lines(dir: &TempDir) -> Vec<serde_json::Value> {
        list_partitions(&dir.path().join("firehose_stream"))
            .unwrap()
            .iter()
            .flat_map(|path| {
                fs::read_to_string(path)
                    .unwrap()
                    .lines()
                    .map(|line| serde_json::from_str(line).unwrap())
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn checkpoint(dir: &TempDir) -> Option<u64> {
        CheckpointStore::new(dir.path().join("cursors.json")).position(CONSUMER)
    }

    fn transport(reason: &str) -> SourceError {
        SourceError::Transport(reason.to_string())
    }

    #[test]
    fn commit_is_written_then_checkpointed() {
        let dir = TempDir::new().unwrap();
        let mut consumer = consumer(&dir, vec![], WritePolicy::Fatal);

        let disposition = consumer
            .handle_event(StreamEvent::Commit(post_commit(100, "hello")))
            .unwrap();

        assert_eq!(
            disposition,
            Disposition::Processed {
                sequence: 100,
                records: 1
            }
        );
        let lines = lines(&dir);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["sequence"], 100);
        assert_eq!(lines[0]["text"], "hello");
        assert_eq!(lines[0]["$type"], "app.bsky.feed.post");
        assert_eq!(checkpoint(&dir), Some(100));
        assert_eq!(consumer.position(), Some(100));
    }

    #[test]
    fn empty_ops_commit_advances_without_writing() {
        let dir = TempDir::new().unwrap();
        let mut consumer = consumer(&dir, vec![], WritePolicy::Fatal);
        let mut commit = post_commit(5, "unused");
        commit.operations.clear();

        let disposition = consumer.handle_event(StreamEvent::Commit(commit)).unwrap();

        assert_eq!(
            disposition,
            Disposition::Processed {
                sequence: 5,
                records: 0
            }
        );
        assert!(lines(&dir).is_empty());
        assert_eq!(checkpoint(&dir), Some(5));
    }

    #[test]
    fn invalid_events_neither_write_nor_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut consumer = consumer(&dir, vec![], WritePolicy::Fatal);
        let mut no_blocks = post_commit(9, "x");
        no_blocks.blocks.clear();

        for event in [
            StreamEvent::Commit(no_blocks),
            StreamEvent::Malformed {
                reason: "garbage".to_string(),
            },
            StreamEvent::Other {
                kind: "#identity".to_string(),
                sequence: Some(10),
            },
        ] {
            assert_eq!(consumer.handle_event(event).unwrap(), Disposition::Skipped);
        }

        assert!(lines(&dir).is_empty());
        assert_eq!(checkpoint(&dir), None);
        assert_eq!(consumer.position(), None);
        assert_eq!(consumer.stats().events_skipped, 3);
    }

    #[test]
    fn fallback_decode_is_counted_as_degraded() {
        let dir = TempDir::new().unwrap();
        let mut consumer = consumer(&dir, vec![], WritePolicy::Fatal);

        let block = record_block(
            "com.example.signed",
            vec![("sig", ipld_core::ipld::Ipld::Bytes(vec![0xff, 0xfe]))],
        );
        let cid = block_cid(&block);
        let mut commit = post_commit(12, "x");
        commit.blocks = car(&[(cid, block)]);
        commit.operations[0].content_id = Some(cid.to_string());

        consumer.handle_event(StreamEvent::Commit(commit)).unwrap();

        let lines = lines(&dir);
        assert_eq!(lines[0]["sig"], "//4=");
        assert_eq!(consumer.stats().degraded_records, 1);
        assert_eq!(checkpoint(&dir), Some(12));
    }

    #[test]
    fn backwards_sequence_is_still_processed() {
        let dir = TempDir::new().unwrap();
        let mut consumer = consumer(&dir, vec![], WritePolicy::Fatal).starting_at(Some(50));

        consumer
            .handle_event(StreamEvent::Commit(post_commit(40, "late")))
            .unwrap();

        assert_eq!(consumer.position(), Some(40));
        assert_eq!(checkpoint(&dir), Some(40));
    }

    #[tokio::test]
    async fn clean_close_ends_the_run_on_first_attempt() {
        let dir = TempDir::new().unwrap();
        let script = vec![Connection::Deliver(vec![
            Ok(StreamEvent::Commit(post_commit(1, "a"))),
            Ok(StreamEvent::Commit(post_commit(2, "b"))),
        ])];
        let mut consumer = consumer(&dir, script, WritePolicy::Fatal).starting_at(Some(0));

        let attempts = consumer.run_with_retry(&RetryPolicy::default()).await.unwrap();

        assert_eq!(attempts, 1);
        assert_eq!(consumer.source().cursors(), vec![Some(0)]);
        assert_eq!(consumer.state(), ConsumerState::Disconnected);
        assert_eq!(consumer.stats().commits_processed, 2);
        assert_eq!(lines(&dir).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_exhaust_the_budget() {
        let dir = TempDir::new().unwrap();
        let mut consumer = consumer(&dir, vec![], WritePolicy::Fatal);
        let started = tokio::time::Instant::now();

        let err = consumer.run_with_retry(&RetryPolicy::default()).await.unwrap_err();

        assert!(matches!(err, ConsumerError::Exhausted { attempts: 5, .. }));
        assert_eq!(consumer.source().attempts(), 5);
        assert_eq!(consumer.state(), ConsumerState::Failed);
        // 4 + 4 + 4 + 8 seconds of backoff between the five attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20));
        assert!(elapsed < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_third_attempt_stops_retrying() {
        let dir = TempDir::new().unwrap();
        let script = vec![
            Connection::Refuse(SourceError::Connect("refused".to_string())),
            Connection::Deliver(vec![
                Ok(StreamEvent::Commit(post_commit(10, "a"))),
                Err(transport("reset by peer")),
            ]),
            Connection::Deliver(vec![Ok(StreamEvent::Commit(post_commit(11, "b")))]),
            Connection::Deliver(vec![Ok(StreamEvent::Commit(post_commit(99, "never")))]),
        ];
        let mut consumer = consumer(&dir, script, WritePolicy::Fatal).starting_at(Some(3));

        let attempts = consumer.run_with_retry(&RetryPolicy::default()).await.unwrap();

        assert_eq!(attempts, 3);
        // Every reconnect resumes from the last processed sequence.
        assert_eq!(consumer.source().cursors(), vec![Some(3), Some(3), Some(10)]);
        assert_eq!(checkpoint(&dir), Some(11));
        let sequences: Vec<_> = lines(&dir).iter().map(|l| l["sequence"].clone()).collect();
        assert_eq!(sequences, vec![10, 11]);
    }

    #[tokio::test]
    async fn fatal_write_error_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let script = vec![
            Connection::Deliver(vec![Ok(StreamEvent::Commit(post_commit(1, "a")))]),
            Connection::Deliver(vec![]),
        ];
        let mut consumer = consumer(&dir, script, WritePolicy::Fatal);
        // Replace the partition root with a file so partition directories cannot be created.
        let root = dir.path().join("firehose_stream");
        fs::remove_dir_all(&root).unwrap();
        fs::write(&root, "").unwrap();

        let err = consumer.run_with_retry(&RetryPolicy::default()).await.unwrap_err();

        assert!(matches!(err, ConsumerError::Storage(_)));
        assert!(!err.is_retryable());
        assert_eq!(consumer.source().attempts(), 1);
        assert_eq!(checkpoint(&dir), None);
    }

    #[tokio::test]
    async fn lenient_write_policy_keeps_consuming() {
        let dir = TempDir::new().unwrap();
        let script = vec![Connection::Deliver(vec![Ok(StreamEvent::Commit(post_commit(
            1, "a",
        )))])];
        let mut consumer = consumer(&dir, script, WritePolicy::LogAndContinue);
        let root = dir.path().join("firehose_stream");
        fs::remove_dir_all(&root).unwrap();
        fs::write(&root, "").unwrap();

        consumer.run_with_retry(&RetryPolicy::default()).await.unwrap();

        assert_eq!(checkpoint(&dir), Some(1));
    }
}
