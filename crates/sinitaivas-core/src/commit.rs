// ABOUTME: Firehose commit and operation types, the unit of change delivered by the event source.
// ABOUTME: Also parses record paths into collection and key and builds canonical at:// URIs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// URI scheme used for canonical record addresses.
pub const URI_SCHEME: &str = "at";

/// Errors raised while interpreting commit contents.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("unknown operation action: {0}")]
    UnknownAction(String),

    #[error("malformed record path {path:?} in repository {repository_id:?}")]
    MalformedPath { repository_id: String, path: String },
}

/// The mutation an operation applies to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = CommitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            other => Err(CommitError::UnknownAction(other.to_string())),
        }
    }
}

/// One mutation inside a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub action: Action,
    /// `<collection>/<record_key>`
    pub path: String,
    /// Reference into the commit's blocks payload. Absent for deletes.
    pub content_id: Option<String>,
}

/// One ordered unit of change from the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sequence: u64,
    pub repository_id: String,
    pub revision: String,
    pub since: Option<String>,
    pub time: String,
    pub blocks: Vec<u8>,
    pub operations: Vec<Operation>,
}

impl Commit {
    /// True when the commit carries no block payload at all.
    pub fn has_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }
}

/// A record path resolved against its repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPath {
    pub collection: String,
    pub record_key: String,
    pub uri: String,
}

impl RecordPath {
    /// Split `path` into collection and record key and build the canonical
    /// `at://<repository>/<collection>/<key>` URI.
    pub fn parse(repository_id: &str, path: &str) -> Result<Self, CommitError> {
        let malformed = || CommitError::MalformedPath {
            repository_id: repository_id.to_string(),
            path: path.to_string(),
        };

        if repository_id.is_empty() || repository_id.contains('/') {
            return Err(malformed());
        }

        let (collection, record_key) = path.split_once('/').ok_or_else(malformed)?;
        if collection.is_empty() || record_key.is_empty() || record_key.contains('/') {
            return Err(malformed());
        }

        Ok(Self {
            collection: collection.to_string(),
            record_key: record_key.to_string(),
            uri: format!("{}://{}/{}", URI_SCHEME, repository_id, path),
        })
    }
}
