// ABOUTME: Core library for sinitaivas, containing the firehose data model and record decoding.
// ABOUTME: Defines commits, the field-value tree, decoded records, and the per-operation decode pipeline.

pub mod commit;
pub mod decode;
pub mod outcome;
pub mod record;
pub mod time;
pub mod value;

pub use commit::{Action, Commit, CommitError, Operation, RecordPath};
pub use decode::{BlockDecoder, BlockError, BlockIndex, RecordDecoder, TypedRecord};
pub use outcome::Outcome;
pub use record::DecodedRecord;
pub use value::{Base64Encoder, BinaryEncoder, EncodeError, FieldMap, FieldValue, ValueError};
