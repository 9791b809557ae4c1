// ABOUTME: Test support: a scripted event source plus builders for CIDs, DAG-CBOR blocks, CAR payloads, and frames.
// ABOUTME: Compiled for this crate's tests and for dependents enabling the `testing` feature.

use std::collections::{BTreeMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use iroh_car::{CarHeader, CarWriter};
use sinitaivas_core::{Action, Commit, Operation};

use crate::frame::{COMMIT_KIND, OP_MESSAGE};
use crate::source::{EventSource, EventStream, SourceError, StreamEvent};

/// DAG-CBOR multicodec.
const DAG_CBOR: u8 = 0x71;
/// sha2-256 multihash code and digest length.
const SHA2_256: u8 = 0x12;
const SHA2_256_LEN: u8 = 0x20;

/// What one call to [`ScriptedSource::subscribe`] does.
#[derive(Debug, Clone)]
pub enum Connection {
    /// Fail the subscription attempt outright.
    Refuse(SourceError),
    /// Deliver these items then end the stream.
    Deliver(Vec<Result<StreamEvent, SourceError>>),
}

/// An [`EventSource`] that plays back a fixed script, one entry per
/// subscription, and records the cursor each subscription asked for.
/// Once the script runs out every further subscription is refused.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Connection>>,
    cursors: Mutex<Vec<Option<u64>>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Connection>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            cursors: Mutex::new(Vec::new()),
        }
    }

    /// Cursors passed to `subscribe`, in call order.
    pub fn cursors(&self) -> Vec<Option<u64>> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn attempts(&self) -> usize {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn subscribe(&self, cursor: Option<u64>) -> Result<EventStream, SourceError> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cursor);

        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(Connection::Deliver(items)) => Ok(Box::pin(futures::stream::iter(items))),
            Some(Connection::Refuse(e)) => Err(e),
            None => Err(SourceError::Connect("script exhausted".to_string())),
        }
    }
}

/// A deterministic CIDv1 (dag-cbor, sha2-256) whose digest is `seed` repeated.
pub fn cid_for(seed: u8) -> Cid {
    cid_with_digest([seed; SHA2_256_LEN as usize])
}

/// A CIDv1 derived from the contents of `block`. Distinct blocks get distinct
/// ids; the digest is not a real sha2-256.
pub fn block_cid(block: &[u8]) -> Cid {
    let mut hasher = DefaultHasher::new();
    block.hash(&mut hasher);
    let word = hasher.finish().to_be_bytes();

    let mut digest = [0u8; SHA2_256_LEN as usize];
    for (i, byte) in digest.iter_mut().enumerate() {
        *byte = word[i % word.len()];
    }
    cid_with_digest(digest)
}

fn cid_with_digest(digest: [u8; SHA2_256_LEN as usize]) -> Cid {
    let mut bytes = vec![0x01, DAG_CBOR, SHA2_256, SHA2_256_LEN];
    bytes.extend(digest);
    Cid::try_from(bytes.as_slice()).expect("well-formed cid bytes")
}

pub fn text(s: &str) -> Ipld {
    Ipld::String(s.to_string())
}

pub fn map(entries: Vec<(&str, Ipld)>) -> Ipld {
    Ipld::Map(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect::<BTreeMap<_, _>>(),
    )
}

pub fn encode(value: &Ipld) -> Vec<u8> {
    serde_ipld_dagcbor::to_vec(value).expect("dag-cbor encoding into a vec")
}

/// A DAG-CBOR record block with `$type` plus `fields`.
pub fn record_block(type_name: &str, fields: Vec<(&str, Ipld)>) -> Vec<u8> {
    let mut entries = vec![("$type", text(type_name))];
    entries.extend(fields);
    encode(&map(entries))
}

/// A CAR v1 payload holding `blocks`, rooted at the first block.
pub fn car(blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
    let root = blocks.first().map_or_else(|| cid_for(0), |(cid, _)| *cid);

    let mut out = Vec::new();
    futures::executor::block_on(async {
        let mut writer = CarWriter::new(CarHeader::new_v1(vec![root]), &mut out);
        for (cid, block) in blocks {
            writer.write(*cid, block).await.expect("car block into a vec");
        }
        writer.finish().await.expect("car flush into a vec");
    });
    out
}

/// A commit creating one post whose block is present in the payload.
pub fn post_commit(sequence: u64, body: &str) -> Commit {
    let block = record_block(
        "app.bsky.feed.post",
        vec![
            ("text", text(body)),
            ("createdAt", text("2025-01-01T00:00:00.000Z")),
        ],
    );
    let cid = block_cid(&block);

    Commit {
        sequence,
        repository_id: "did:plc:testauthor".to_string(),
        revision: format!("rev{}", sequence),
        since: Some(format!("rev{}", sequence.saturating_sub(1))),
        time: "2025-01-01T00:00:00.000Z".to_string(),
        blocks: car(&[(cid, block)]),
        operations: vec![Operation {
            action: Action::Create,
            path: format!("app.bsky.feed.post/{}", sequence),
            content_id: Some(cid.to_string()),
        }],
    }
}

/// A raw frame: `{op, t}` header followed by `body`.
pub fn frame(op: i64, kind: Option<&str>, body: &Ipld) -> Vec<u8> {
    let mut header = vec![("op", Ipld::Integer(op.into()))];
    if let Some(kind) = kind {
        header.push(("t", text(kind)));
    }

    let mut out = encode(&map(header));
    out.extend(encode(body));
    out
}

/// The `#commit` frame a relay would send for `commit`.
pub fn commit_frame(commit: &Commit) -> Vec<u8> {
    let ops = commit
        .operations
        .iter()
        .map(|op| {
            let cid = match &op.content_id {
                Some(content_id) => Ipld::Link(
                    Cid::try_from(content_id.as_str()).expect("content id parses as cid"),
                ),
                None => Ipld::Null,
            };
            map(vec![
                ("action", text(op.action.as_str())),
                ("path", text(&op.path)),
                ("cid", cid),
            ])
        })
        .collect();

    let since = match &commit.since {
        Some(since) => text(since),
        None => Ipld::Null,
    };

    let body = map(vec![
        ("seq", Ipld::Integer(commit.sequence.into())),
        ("repo", text(&commit.repository_id)),
        ("rev", text(&commit.revision)),
        ("since", since),
        ("time", text(&commit.time)),
        ("blocks", Ipld::Bytes(commit.blocks.clone())),
        ("ops", Ipld::List(ops)),
        ("tooBig", Ipld::Bool(false)),
    ]);

    frame(OP_MESSAGE, Some(COMMIT_KIND), &body)
}
