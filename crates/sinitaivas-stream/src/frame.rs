// ABOUTME: Parses relay event-stream frames: a CBOR header followed by a DAG-CBOR body.
// ABOUTME: Commit bodies become Commit values; other kinds pass through as opaque events.

use ipld_core::cid::Cid;
use serde::Deserialize;
use sinitaivas_core::{Action, Commit, Operation};

use crate::source::{SourceError, StreamEvent};

/// Header `op` for a regular message.
pub const OP_MESSAGE: i64 = 1;
/// Header `op` for an error frame.
pub const OP_ERROR: i64 = -1;

/// Message kind carrying repository commits.
pub const COMMIT_KIND: &str = "#commit";

#[derive(Debug, Deserialize)]
struct FrameHeader {
    op: i64,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: Option<String>,
}

/// The sequence number every message kind carries.
#[derive(Debug, Deserialize)]
struct SequencedBody {
    #[serde(default)]
    seq: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    seq: i64,
    repo: String,
    rev: String,
    #[serde(default)]
    since: Option<String>,
    time: String,
    #[serde(default, with = "serde_bytes")]
    blocks: Vec<u8>,
    #[serde(default)]
    ops: Vec<RepoOp>,
}

#[derive(Debug, Deserialize)]
struct RepoOp {
    action: String,
    path: String,
    #[serde(default)]
    cid: Option<Cid>,
}

/// Parse one binary frame.
///
/// Unparseable frames become [`StreamEvent::Malformed`]; only an error frame
/// from the relay is returned as `Err`, since it ends the subscription.
pub fn parse_frame(bytes: &[u8]) -> Result<StreamEvent, SourceError> {
    // ciborium consumes exactly the header item, leaving the body in `body`.
    let mut body = bytes;
    let header: FrameHeader = match ciborium::de::from_reader(&mut body) {
        Ok(header) => header,
        Err(e) => return Ok(malformed(format!("unreadable frame header: {}", e))),
    };

    match header.op {
        OP_ERROR => {
            let (error, message) = match serde_ipld_dagcbor::from_slice::<ErrorBody>(body) {
                Ok(ErrorBody { error, message }) => (error, message),
                Err(_) => ("unknown".to_string(), None),
            };
            Err(SourceError::Remote { error, message })
        }
        OP_MESSAGE => {
            let Some(kind) = header.t else {
                return Ok(malformed("message frame without a type"));
            };
            if kind == COMMIT_KIND {
                Ok(match commit_from_body(body) {
                    Ok(commit) => StreamEvent::Commit(commit),
                    Err(reason) => malformed(reason),
                })
            } else {
                let sequence = serde_ipld_dagcbor::from_slice::<SequencedBody>(body)
                    .ok()
                    .and_then(|b| b.seq)
                    .and_then(|seq| u64::try_from(seq).ok());
                Ok(StreamEvent::Other { kind, sequence })
            }
        }
        other => Ok(malformed(format!("unknown frame op {}", other))),
    }
}

fn malformed(reason: impl Into<String>) -> StreamEvent {
    StreamEvent::Malformed {
        reason: reason.into(),
    }
}

fn commit_from_body(body: &[u8]) -> Result<Commit, String> {
    let body: CommitBody = serde_ipld_dagcbor::from_slice(body)
        .map_err(|e| format!("unreadable commit body: {}", e))?;

    let sequence = u64::try_from(body.seq).map_err(|_| format!("commit has negative seq {}", body.seq))?;

    let operations = body
        .ops
        .into_iter()
        .map(|op| {
            let action = op.action.parse::<Action>().map_err(|e| format!("commit {}: {}", sequence, e))?;
            Ok(Operation {
                action,
                path: op.path,
                content_id: op.cid.map(|cid| cid.to_string()),
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(Commit {
        sequence,
        repository_id: body.repo,
        revision: body.rev,
        since: body.since,
        time: body.time,
        blocks: body.blocks,
        operations,
    })
}
