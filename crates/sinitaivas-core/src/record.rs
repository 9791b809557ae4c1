// ABOUTME: The flat JSON record written to the log for each commit operation.
// ABOUTME: Builds the identity/provenance envelope and merges decoded content after it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::commit::{Commit, Operation, RecordPath};
use crate::outcome::Outcome;
use crate::time::to_zulu;

/// Envelope keys, in the order they appear in every record.
pub const ENVELOPE_FIELDS: [&str; 12] = [
    "sequence",
    "author",
    "revision",
    "since",
    "commit_time",
    "collected_at",
    "action",
    "path",
    "record_type",
    "record_key",
    "uri",
    "content_id",
];

/// One decoded operation as an ordered JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecodedRecord(Map<String, Value>);

impl DecodedRecord {
    /// Build the envelope for `op` within `commit`.
    ///
    /// A path that does not resolve to a record URI leaves `record_type`,
    /// `record_key` and `uri` null and yields a degraded outcome; the caller
    /// must not merge content into it.
    pub fn envelope(commit: &Commit, op: &Operation, collected_at: &DateTime<Utc>) -> Outcome<Self> {
        let mut fields = Map::new();
        fields.insert("sequence".into(), Value::from(commit.sequence));
        fields.insert("author".into(), Value::from(commit.repository_id.clone()));
        fields.insert("revision".into(), Value::from(commit.revision.clone()));
        fields.insert(
            "since".into(),
            commit.since.clone().map(Value::from).unwrap_or(Value::Null),
        );
        fields.insert("commit_time".into(), Value::from(commit.time.clone()));
        fields.insert("collected_at".into(), Value::from(to_zulu(collected_at)));
        fields.insert("action".into(), Value::from(op.action.as_str()));
        fields.insert("path".into(), Value::from(op.path.clone()));

        let resolved = RecordPath::parse(&commit.repository_id, &op.path);
        let (record_type, record_key, uri) = match &resolved {
            Ok(path) => (
                Value::from(path.collection.clone()),
                Value::from(path.record_key.clone()),
                Value::from(path.uri.clone()),
            ),
            Err(_) => (Value::Null, Value::Null, Value::Null),
        };
        fields.insert("record_type".into(), record_type);
        fields.insert("record_key".into(), record_key);
        fields.insert("uri".into(), uri);
        fields.insert(
            "content_id".into(),
            op.content_id.clone().map(Value::from).unwrap_or(Value::Null),
        );

        let record = Self(fields);
        match resolved {
            Ok(_) => Outcome::complete(record),
            Err(e) => Outcome::degraded(record, e.to_string()),
        }
    }

    /// Merge content keys after the envelope. Content keys that collide with
    /// envelope keys overwrite them.
    pub fn merge(&mut self, content: Map<String, Value>) {
        for (key, value) in content {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn sequence(&self) -> Option<u64> {
        self.0.get("sequence").and_then(Value::as_u64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for DecodedRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Action;
    use chrono::TimeZone;
    use serde_json::json;

    fn make_commit(ops: Vec<Operation>) -> Commit {
        Commit {
            sequence: 456,
            repository_id: "did:plc:author".to_string(),
            revision: "3kabc".to_string(),
            since: None,
            time: "2025-01-01T00:00:00.000Z".to_string(),
            blocks: vec![1],
            operations: ops,
        }
    }

    fn collected_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn envelope_has_all_fields_in_order() {
        let op = Operation {
            action: Action::Create,
            path: "app.bsky.feed.like/3kxyz".to_string(),
            content_id: Some("bafyreiabc".to_string()),
        };
        let commit = make_commit(vec![op.clone()]);

        let outcome = DecodedRecord::envelope(&commit, &op, &collected_at());
        assert!(!outcome.is_degraded());
        let record = outcome.into_value();

        assert_eq!(record.as_map().keys().map(String::as_str).collect::<Vec<_>>(), ENVELOPE_FIELDS.to_vec());
        assert_eq!(record.sequence(), Some(456));
        assert_eq!(record.get("author"), Some(&json!("did:plc:author")));
        assert_eq!(record.get("since"), Some(&Value::Null));
        assert_eq!(record.get("collected_at"), Some(&json!("2025-01-01T12:00:00.000000Z")));
        assert_eq!(record.get("action"), Some(&json!("create")));
        assert_eq!(record.get("record_type"), Some(&json!("app.bsky.feed.like")));
        assert_eq!(record.get("record_key"), Some(&json!("3kxyz")));
        assert_eq!(
            record.get("uri"),
            Some(&json!("at://did:plc:author/app.bsky.feed.like/3kxyz"))
        );
        assert_eq!(record.get("content_id"), Some(&json!("bafyreiabc")));
    }

    #[test]
    fn malformed_path_degrades_but_keeps_envelope() {
        let op = Operation {
            action: Action::Delete,
            path: "no-slash".to_string(),
            content_id: None,
        };
        let commit = make_commit(vec![op.clone()]);

        let outcome = DecodedRecord::envelope(&commit, &op, &collected_at());
        assert!(outcome.is_degraded());
        let record = outcome.into_value();
        assert_eq!(record.sequence(), Some(456));
        assert_eq!(record.get("uri"), Some(&Value::Null));
        assert_eq!(record.get("record_type"), Some(&Value::Null));
        assert_eq!(record.get("content_id"), Some(&Value::Null));
    }

    #[test]
    fn content_merges_after_envelope_and_may_shadow_it() {
        let op = Operation {
            action: Action::Create,
            path: "app.bsky.feed.post/1".to_string(),
            content_id: Some("bafy".to_string()),
        };
        let commit = make_commit(vec![op.clone()]);
        let mut record = DecodedRecord::envelope(&commit, &op, &collected_at()).into_value();

        let content = json!({"text": "hi", "action": "shadowed"});
        record.merge(content.as_object().unwrap().clone());

        let keys: Vec<_> = record.as_map().keys().map(String::as_str).collect();
        assert_eq!(keys.last(), Some(&"text"));
        assert_eq!(record.get("action"), Some(&json!("shadowed")));
        assert_eq!(record.get("sequence"), Some(&json!(456)));
    }
}
