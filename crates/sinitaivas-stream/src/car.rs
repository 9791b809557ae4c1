// ABOUTME: Block decoder for CAR v1 payloads holding DAG-CBOR records.
// ABOUTME: Reads blocks with iroh-car, decodes known lexicon records via atrium, and falls back to raw IPLD.

use atrium_api::record::KnownRecord;
use ipld_core::ipld::Ipld;
use iroh_car::CarReader;
use serde_json::Value;
use sinitaivas_core::{BlockDecoder, BlockError, BlockIndex, FieldMap, FieldValue, TypedRecord};

/// Decodes CAR v1 block payloads whose blocks are DAG-CBOR.
#[derive(Debug, Clone, Copy, Default)]
pub struct CarBlockDecoder;

impl CarBlockDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl BlockDecoder for CarBlockDecoder {
    fn index(&self, blocks: &[u8]) -> Result<BlockIndex, BlockError> {
        // The payload is already in memory, so the reader never waits.
        futures::executor::block_on(read_blocks(blocks))
    }

    fn decode_typed(&self, raw: &[u8]) -> Result<TypedRecord, BlockError> {
        let record: KnownRecord =
            serde_ipld_dagcbor::from_slice(raw).map_err(|e| BlockError::NotARecord(e.to_string()))?;

        let content = match serde_json::to_value(&record) {
            Ok(Value::Object(content)) => content,
            Ok(_) => return Err(BlockError::NotARecord("record is not an object".to_string())),
            Err(e) => return Err(BlockError::Decode(e.to_string())),
        };

        let type_name = content
            .get("$type")
            .and_then(Value::as_str)
            .ok_or_else(|| BlockError::NotARecord("missing $type".to_string()))?
            .to_string();

        Ok(TypedRecord { type_name, content })
    }

    fn as_field_map(&self, raw: &[u8]) -> Result<FieldMap, BlockError> {
        let value: Ipld =
            serde_ipld_dagcbor::from_slice(raw).map_err(|e| BlockError::Decode(e.to_string()))?;

        match ipld_to_field(value) {
            FieldValue::Map(fields) => Ok(fields),
            _ => Err(BlockError::NotARecord("top-level value is not a map".to_string())),
        }
    }
}

async fn read_blocks(blocks: &[u8]) -> Result<BlockIndex, BlockError> {
    let mut reader = CarReader::new(blocks)
        .await
        .map_err(|e| BlockError::Container(e.to_string()))?;

    let mut index = BlockIndex::new();
    while let Some((cid, block)) = reader
        .next_block()
        .await
        .map_err(|e| BlockError::Container(e.to_string()))?
    {
        index.insert(cid.to_string(), block);
    }
    Ok(index)
}

fn ipld_to_field(value: Ipld) -> FieldValue {
    match value {
        Ipld::Null => FieldValue::Null,
        Ipld::Bool(b) => FieldValue::Bool(b),
        Ipld::Integer(i) => FieldValue::Integer(i),
        Ipld::Float(f) => FieldValue::Float(f),
        Ipld::String(s) => FieldValue::Text(s),
        Ipld::Bytes(b) => FieldValue::Bytes(b),
        Ipld::Link(cid) => FieldValue::Link(cid.to_string()),
        Ipld::List(items) => FieldValue::List(items.into_iter().map(ipld_to_field).collect()),
        Ipld::Map(entries) => FieldValue::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key, ipld_to_field(value)))
                .collect(),
        ),
    }
}
