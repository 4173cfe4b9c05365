//! Optional value envelope applied when marshaling is enabled.
//!
//! Marshaled values are stored as `{"b64":"<base64 bytes>"}`. Plain decimal
//! counters are stored as they are so the backend can still adjust them.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shared::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    b64: String,
}

pub fn encode(value: &[u8]) -> Result<Bytes> {
    if is_counter(value) {
        return Ok(Bytes::copy_from_slice(value));
    }
    let envelope = Envelope {
        b64: STANDARD.encode(value),
    };
    serde_json::to_vec(&envelope)
        .map(Bytes::from)
        .map_err(|e| Error::Internal(format!("marshal: {}", e)))
}

fn is_counter(value: &[u8]) -> bool {
    !value.is_empty()
        && value.iter().all(u8::is_ascii_digit)
        && std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .is_some()
}

/// Returns `None` when `stored` is not an envelope.
pub fn decode(stored: &[u8]) -> Option<Bytes> {
    let envelope: Envelope = serde_json::from_slice(stored).ok()?;
    STANDARD.decode(envelope.b64).ok().map(Bytes::from)
}
