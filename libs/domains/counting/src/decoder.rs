//! Payload decoding for counting results.
//!
//! Field names are matched case-insensitively: `Id`, `id` and `ID` all fill
//! `id`. Unknown fields are ignored. A payload naming the same field twice
//! under different casing is rejected.

use queue_worker::{DecodeError, PayloadDecoder};
use serde_json::error::Category;
use serde_json::{Map, Value};

use crate::models::{CountingResult, WireCountingResult};

#[derive(Debug, Clone, Copy, Default)]
pub struct CountingResultDecoder;

impl CountingResultDecoder {
    pub fn decode_str(&self, text: &str) -> Result<CountingResult, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(classify)?;

        let object = match value {
            Value::Object(object) => object,
            other => return Err(DecodeError::NotAnObject(json_kind(&other).to_string())),
        };

        let wire: WireCountingResult =
            serde_json::from_value(Value::Object(lowercase_keys(object)?)).map_err(classify)?;

        if wire.id.trim().is_empty() {
            return Err(DecodeError::Schema("field `id` must not be blank".to_string()));
        }

        Ok(wire.into())
    }
}

impl PayloadDecoder<CountingResult> for CountingResultDecoder {
    fn decode(&self, payload: &[u8]) -> Result<CountingResult, DecodeError> {
        let text =
            std::str::from_utf8(payload).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))?;
        self.decode_str(text)
    }
}

fn lowercase_keys(object: Map<String, Value>) -> Result<Map<String, Value>, DecodeError> {
    let mut normalized = Map::with_capacity(object.len());
    for (key, value) in object {
        let lowered = key.to_lowercase();
        if normalized.contains_key(&lowered) {
            return Err(DecodeError::Schema(format!(
                "field `{}` appears more than once",
                lowered
            )));
        }
        normalized.insert(lowered, value);
    }
    Ok(normalized)
}

fn classify(err: serde_json::Error) -> DecodeError {
    match err.classify() {
        Category::Data => DecodeError::Schema(err.to_string()),
        Category::Syntax | Category::Eof | Category::Io => DecodeError::Malformed(err.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
