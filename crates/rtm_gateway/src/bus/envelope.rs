//! Prefixed JSON envelope format shared with downstream dispatchers.

use serde_json::{Map, Value};

/// Marker every gateway→bus message starts with.
pub const ENVELOPE_PREFIX: &str = "JSONRTMOBJ#";

/// Serializes an envelope body with the prefix.
pub fn encode(body: &Map<String, Value>) -> String {
    let mut message = String::from(ENVELOPE_PREFIX);
    // A map of JSON values always serializes.
    message.push_str(&Value::Object(body.clone()).to_string());
    message
}

/// Strips the prefix (when present) and parses the JSON object behind it.
pub fn decode(message: &str) -> Option<Map<String, Value>> {
    let body = message.strip_prefix(ENVELOPE_PREFIX).unwrap_or(message);
    match serde_json::from_str(body).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_prefixes_compact_json() {
        let body = json!({ "command": "ws_stats" });
        let encoded = encode(body.as_object().unwrap());
        assert_eq!(encoded, r#"JSONRTMOBJ#{"command":"ws_stats"}"#);
    }

    #[test]
    fn test_decode_accepts_bare_json_and_rejects_non_objects() {
        assert_eq!(decode(r#"{"a":1}"#).unwrap()["a"], json!(1));
        assert!(decode("JSONRTMOBJ#[1,2]").is_none());
        assert!(decode("JSONRTMOBJ#{oops").is_none());
    }
}
