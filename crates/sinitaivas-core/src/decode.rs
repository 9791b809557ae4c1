// ABOUTME: Per-operation decoding of commit blocks into flat JSON records.
// ABOUTME: Tries a typed decode first, then a binary-safe field-map fallback, never dropping the envelope.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::commit::{Action, Commit, Operation};
use crate::outcome::Outcome;
use crate::record::DecodedRecord;
use crate::value::{Base64Encoder, BinaryEncoder, FieldMap, binary_map_to_text, map_to_json};

/// Errors raised by a [`BlockDecoder`].
#[derive(Debug, Error, PartialEq)]
pub enum BlockError {
    #[error("malformed block container: {0}")]
    Container(String),

    #[error("malformed content id: {0}")]
    ContentId(String),

    #[error("block is not decodable: {0}")]
    Decode(String),

    #[error("block is not a record: {0}")]
    NotARecord(String),
}

/// Raw blocks of one commit, addressed by content id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockIndex {
    blocks: HashMap<String, Vec<u8>>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, content_id: impl Into<String>, block: Vec<u8>) {
        self.blocks.insert(content_id.into(), block);
    }

    /// Find the raw block addressed by `content_id`.
    pub fn locate(&self, content_id: &str) -> Option<&[u8]> {
        self.blocks.get(content_id).map(Vec::as_slice)
    }
}

/// A block decoded against a known record schema, rendered as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord {
    pub type_name: String,
    pub content: Map<String, Value>,
}

/// Turns a commit's opaque blocks payload into records.
pub trait BlockDecoder: Send + Sync {
    /// Split a blocks payload into raw blocks keyed by content id.
    fn index(&self, blocks: &[u8]) -> Result<BlockIndex, BlockError>;

    /// Decode a raw block as one of the known record types.
    fn decode_typed(&self, raw: &[u8]) -> Result<TypedRecord, BlockError>;

    /// Decode a raw block into a plain field map, keeping binary leaves.
    fn as_field_map(&self, raw: &[u8]) -> Result<FieldMap, BlockError>;
}

/// Converts commits into decoded records, one per operation.
pub struct RecordDecoder<D> {
    blocks: D,
    encoder: Box<dyn BinaryEncoder + Send + Sync>,
}

impl<D: BlockDecoder> RecordDecoder<D> {
    pub fn new(blocks: D) -> Self {
        Self {
            blocks,
            encoder: Box::new(Base64Encoder),
        }
    }

    /// Replace the encoder used for binary leaves in the fallback path.
    pub fn with_encoder(mut self, encoder: impl BinaryEncoder + Send + Sync + 'static) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    /// Decode `commit`, stamping every record with the current time.
    pub fn decode(&self, commit: &Commit) -> Vec<Outcome<DecodedRecord>> {
        self.decode_at(commit, &Utc::now())
    }

    /// Decode `commit` with an explicit ingestion timestamp.
    ///
    /// Returns one outcome per operation, in operation order. A commit with
    /// no operations yields nothing.
    pub fn decode_at(
        &self,
        commit: &Commit,
        collected_at: &DateTime<Utc>,
    ) -> Vec<Outcome<DecodedRecord>> {
        if commit.operations.is_empty() {
            return Vec::new();
        }

        let index = match self.blocks.index(&commit.blocks) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::error!(
                    sequence = commit.sequence,
                    repository = %commit.repository_id,
                    error = %e,
                    "failed to index commit blocks, emitting envelope-only records"
                );
                None
            }
        };

        commit
            .operations
            .iter()
            .map(|op| self.decode_operation(commit, op, index.as_ref(), collected_at))
            .collect()
    }

    fn decode_operation(
        &self,
        commit: &Commit,
        op: &Operation,
        index: Option<&BlockIndex>,
        collected_at: &DateTime<Utc>,
    ) -> Outcome<DecodedRecord> {
        let envelope = DecodedRecord::envelope(commit, op, collected_at);
        if envelope.is_degraded() {
            tracing::error!(
                sequence = commit.sequence,
                path = %op.path,
                reasons = ?envelope.reasons(),
                "failed to build record uri, skipping content"
            );
            return envelope;
        }

        let Some(content_id) = op.content_id.as_deref() else {
            return envelope;
        };

        let Some(index) = index else {
            return envelope.degrade("commit blocks could not be indexed");
        };

        let Some(raw) = index.locate(content_id) else {
            if op.action != Action::Delete {
                tracing::debug!(
                    sequence = commit.sequence,
                    content_id,
                    "content block not present in commit"
                );
            }
            return envelope;
        };

        match self.blocks.decode_typed(raw) {
            Ok(typed) => envelope.map(|mut record| {
                record.merge(typed.content);
                record
            }),
            Err(reason) => {
                tracing::debug!(
                    sequence = commit.sequence,
                    content_id,
                    reason = %reason,
                    "typed decode failed, falling back to field map"
                );
                self.merge_fallback(envelope, raw, commit.sequence, content_id)
            }
        }
    }

    fn merge_fallback(
        &self,
        envelope: Outcome<DecodedRecord>,
        raw: &[u8],
        sequence: u64,
        content_id: &str,
    ) -> Outcome<DecodedRecord> {
        let fallback = self
            .blocks
            .as_field_map(raw)
            .map_err(|e| e.to_string())
            .and_then(|fields| {
                map_to_json(&binary_map_to_text(&fields, self.encoder.as_ref()))
                    .map_err(|e| e.to_string())
            });

        match fallback {
            Ok(content) => envelope
                .map(|mut record| {
                    record.merge(content);
                    record
                })
                .degrade("content decoded through field-map fallback"),
            Err(reason) => {
                tracing::error!(
                    sequence,
                    content_id,
                    reason = %reason,
                    "failed to decode content through field-map fallback"
                );
                envelope.degrade(format!("content lost: {}", reason))
            }
        }
    }
}
