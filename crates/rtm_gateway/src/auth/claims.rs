//! Decoded token claims and the identity key derived from them.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Names one logical session: `"{user_id}_{finger_print}"`.
///
/// A user with several devices or tabs holds one key per fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn from_parts(user_id: &str, finger_print: &str) -> Self {
        Self(format!("{user_id}_{finger_print}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute token expiry.
///
/// Issuers send either a unix timestamp or a date string. The parsed instant
/// drives the expiry index; the raw value is echoed back untouched in
/// `ws_cache_connection` so downstream consumers see what the issuer wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct Expiry {
    at: DateTime<Utc>,
    raw: serde_json::Value,
}

impl Expiry {
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            at,
            raw: serde_json::Value::from(at.timestamp()),
        }
    }

    fn from_raw(raw: serde_json::Value) -> Result<Self, String> {
        let at = match &raw {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .and_then(from_epoch)
                .ok_or_else(|| format!("expiry {n} is out of range"))?,
            serde_json::Value::String(s) => parse_expiry_str(s)?,
            other => return Err(format!("expiry has unsupported type: {other}")),
        };
        Ok(Self { at, raw })
    }
}

/// Epoch values past year 33658 in seconds can only be milliseconds.
fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.unsigned_abs() >= 1_000_000_000_000 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

fn parse_expiry_str(value: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = value.trim();
    if let Ok(epoch) = trimmed.parse::<i64>() {
        return from_epoch(epoch).ok_or_else(|| format!("expiry {epoch} is out of range"));
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(at.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(format!("unrecognized expiry format: {value}"))
}

impl Serialize for Expiry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expiry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Expiry::from_raw(raw).map_err(serde::de::Error::custom)
    }
}

/// Accepts `"42"` or `42` for id-like claims; the issuer is not consistent.
pub(crate) fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) if !s.is_empty() => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a non-empty string or number, got {other}"
        ))),
    }
}

/// Verified token payload. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub finger_print: String,
    #[serde(default)]
    pub client_ip: String,
    #[serde(default)]
    pub user_agent: String,
    pub expiry: Expiry,
    #[serde(default)]
    pub topic: String,
}

impl Claims {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::from_parts(&self.user_id, &self.finger_print)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> Result<Claims, serde_json::Error> {
        serde_json::from_value(value)
    }

    #[test]
    fn test_identity_key_format() {
        let key = IdentityKey::from_parts("91", "f00d");
        assert_eq!(key.as_str(), "91_f00d");
        assert_eq!(key.to_string(), "91_f00d");
    }

    #[test]
    fn test_numeric_user_id_is_accepted() {
        let claims = decode(json!({
            "user_id": 91,
            "finger_print": "abc",
            "expiry": 4_102_444_800i64,
        }))
        .unwrap();
        assert_eq!(claims.identity().as_str(), "91_abc");
        assert!(claims.user_name.is_empty());
    }

    #[test]
    fn test_expiry_formats() {
        let from_date = decode(json!({
            "user_id": "1",
            "finger_print": "f",
            "expiry": "2030-01-02 03:04:05",
        }))
        .unwrap();
        assert_eq!(from_date.expiry.at().to_rfc3339(), "2030-01-02T03:04:05+00:00");

        let from_rfc = decode(json!({
            "user_id": "1",
            "finger_print": "f",
            "expiry": "2030-01-02T03:04:05Z",
        }))
        .unwrap();
        assert_eq!(from_rfc.expiry.at(), from_date.expiry.at());

        let from_millis = decode(json!({
            "user_id": "1",
            "finger_print": "f",
            "expiry": from_date.expiry.at().timestamp_millis(),
        }))
        .unwrap();
        assert_eq!(from_millis.expiry.at(), from_date.expiry.at());
    }

    #[test]
    fn test_extreme_epoch_expiry_is_rejected_without_panicking() {
        for extreme in [i64::MIN, i64::MAX] {
            assert!(from_epoch(extreme).is_none());
            assert!(decode(json!({
                "user_id": "1",
                "finger_print": "f",
                "expiry": extreme,
            }))
            .is_err());
        }
        let as_string = decode(json!({
            "user_id": "1",
            "finger_print": "f",
            "expiry": i64::MIN.to_string(),
        }));
        assert!(as_string.is_err());
    }

    #[test]
    fn test_expiry_raw_value_round_trips() {
        let claims = decode(json!({
            "user_id": "1",
            "finger_print": "f",
            "expiry": "2030-01-02 03:04:05",
        }))
        .unwrap();
        let echoed = serde_json::to_value(&claims).unwrap();
        assert_eq!(echoed["expiry"], json!("2030-01-02 03:04:05"));
    }

    #[test]
    fn test_missing_identity_claims_are_rejected() {
        assert!(decode(json!({ "finger_print": "f", "expiry": 1 })).is_err());
        assert!(decode(json!({ "user_id": "1", "expiry": 1 })).is_err());
        assert!(decode(json!({ "user_id": "", "finger_print": "f", "expiry": 1 })).is_err());
        assert!(decode(json!({ "user_id": "1", "finger_print": "f", "expiry": "soon" })).is_err());
    }
}
