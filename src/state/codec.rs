//! Binary framing and typed payload encoding for plugin state
//!
//! Frame layout (codec version 1):
//!
//! ```text
//! +-------+---------------+---------------------+-----------+
//! | "PS"  | state version | payload length (BE) | payload   |
//! | 2 B   | 1 B           | 4 B                 | n B       |
//! +-------+---------------+---------------------+-----------+
//! ```
//!
//! The state version is the plugin's own schema version and is independent of
//! the codec version. Typed payloads are JSON so that a reader knowing only
//! part of the shape can still decode them.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Codec version written by this build
pub const CURRENT_CODEC_VERSION: u32 = 1;

const FRAME_MAGIC: [u8; 2] = *b"PS";
const HEADER_LEN: usize = 7;

/// A decoded plugin state frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFrame {
    pub state_version: u8,
    pub payload: Vec<u8>,
}

impl StateFrame {
    pub fn new(state_version: u8, payload: Vec<u8>) -> Self {
        Self {
            state_version,
            payload,
        }
    }

    /// Encode into the current codec's binary frame
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&FRAME_MAGIC);
        out.push(self.state_version);
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a frame produced by [`StateFrame::encode`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::StateCorrupted(format!(
                "frame is {} bytes, shorter than the {HEADER_LEN} byte header",
                bytes.len()
            )));
        }
        if bytes[..2] != FRAME_MAGIC {
            return Err(Error::StateCorrupted("missing frame marker".to_string()));
        }

        let state_version = bytes[2];
        let declared = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]) as usize;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() != declared {
            return Err(Error::StateCorrupted(format!(
                "frame declares {declared} payload bytes, found {}",
                payload.len()
            )));
        }

        Ok(Self::new(state_version, payload.to_vec()))
    }
}

/// Encode a typed plugin state value
pub fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a typed plugin state value.
///
/// Fields the target type does not know about are dropped, unless `strict` is
/// set, in which case they are reported as a schema mismatch.
pub fn decode_value<T>(state_version: u8, payload: &[u8], strict: bool) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let raw: Value = serde_json::from_slice(payload).map_err(|e| Error::StateSchemaMismatch {
        state_version,
        reason: format!("payload is not valid JSON: {e}"),
    })?;

    let value: T =
        serde_json::from_value(raw.clone()).map_err(|e| Error::StateSchemaMismatch {
            state_version,
            reason: e.to_string(),
        })?;

    let known = serde_json::to_value(&value)?;
    let mut unknown = Vec::new();
    collect_unknown_fields(&raw, &known, "$", &mut unknown);

    if !unknown.is_empty() {
        if strict {
            return Err(Error::StateSchemaMismatch {
                state_version,
                reason: format!("unknown fields: {}", unknown.join(", ")),
            });
        }
        debug!("Dropping unknown plugin state fields: {}", unknown.join(", "));
    }

    Ok(value)
}

// Paths present in `raw` that did not survive a round trip through the typed
// value. Null-valued fields are ignored since skipped `None`s look the same.
fn collect_unknown_fields(raw: &Value, known: &Value, path: &str, out: &mut Vec<String>) {
    match (raw, known) {
        (Value::Object(raw_map), Value::Object(known_map)) => {
            for (key, raw_child) in raw_map {
                let child_path = format!("{path}.{key}");
                match known_map.get(key) {
                    Some(known_child) => {
                        collect_unknown_fields(raw_child, known_child, &child_path, out)
                    }
                    None if raw_child.is_null() => {}
                    None => out.push(child_path),
                }
            }
        }
        (Value::Array(raw_items), Value::Array(known_items)) => {
            for (i, (raw_child, known_child)) in raw_items.iter().zip(known_items).enumerate() {
                collect_unknown_fields(raw_child, known_child, &format!("{path}[{i}]"), out);
            }
        }
        _ => {}
    }
}
