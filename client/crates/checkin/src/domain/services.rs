//! Domain Services
//!
//! Pure logic for the scannable session code: the two accepted textual
//! forms, and timestamp parsing shared with the wire layer.

use chrono::{DateTime, NaiveDateTime, Utc};
use kernel::id::SessionId;
use serde_json::{Map, Value};

use crate::domain::entities::DecodedCode;
use crate::domain::value_objects::Nonce;
use crate::error::{CheckinError, CheckinResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadField {
    SessionId,
    Nonce,
    ExpiresAt,
}

/// Accepted JSON key spellings per field, first match wins
const FIELD_KEYS: [(PayloadField, &[&str]); 3] = [
    (PayloadField::SessionId, &["session_id", "sessionId"]),
    (PayloadField::Nonce, &["nonce", "qr_nonce"]),
    (PayloadField::ExpiresAt, &["expires_at", "expiresAt"]),
];

fn lookup(object: &Map<String, Value>, field: PayloadField) -> Option<&Value> {
    FIELD_KEYS
        .iter()
        .filter(|(f, _)| *f == field)
        .flat_map(|(_, keys)| keys.iter())
        .find_map(|key| object.get(*key))
}

/// Encoder/decoder for scanned session codes
///
/// Literal form: `<PREFIX>:<session_id>:<nonce>`.
/// JSON form: `{"session_id"|"sessionId": <int>, "nonce"|"qr_nonce": <string>}`,
/// optionally with `"expires_at"|"expiresAt"`.
///
/// ## Examples
/// ```rust
/// use checkin::domain::services::CodePayloadCodec;
/// use kernel::id::SessionId;
///
/// let codec = CodePayloadCodec::default();
/// let decoded = codec.decode("ABSENSE:42:abc123", SessionId::new(42)).unwrap();
/// assert_eq!(decoded.nonce.as_str(), "abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePayloadCodec {
    prefix: String,
}

impl Default for CodePayloadCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

impl CodePayloadCodec {
    pub const DEFAULT_PREFIX: &'static str = "ABSENSE";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Decode scanned text and check it belongs to `expected`
    ///
    /// ## Errors
    /// * `InvalidPayload` - neither form parses
    /// * `WrongSession` - the code names another session
    pub fn decode(&self, raw: &str, expected: SessionId) -> CheckinResult<DecodedCode> {
        let decoded = self.parse(raw)?;
        if decoded.session_id != expected {
            return Err(CheckinError::WrongSession {
                expected,
                found: decoded.session_id,
            });
        }
        Ok(decoded)
    }

    /// Decode scanned text without a session check
    pub fn parse(&self, raw: &str) -> CheckinResult<DecodedCode> {
        let raw = raw.trim();
        self.parse_literal(raw)
            .or_else(|| parse_json(raw))
            .ok_or(CheckinError::InvalidPayload)
    }

    /// Literal form for a session and nonce
    pub fn encode_literal(&self, session_id: SessionId, nonce: &Nonce) -> String {
        format!("{}:{}:{}", self.prefix, session_id, nonce)
    }

    fn parse_literal(&self, raw: &str) -> Option<DecodedCode> {
        let mut fields = raw.split(':');
        if fields.next()? != self.prefix {
            return None;
        }
        let session_id = fields.next()?.trim().parse::<i64>().ok().filter(|&id| id != 0)?;
        let nonce = Nonce::new(fields.next()?)?;
        Some(DecodedCode {
            session_id: SessionId::new(session_id),
            nonce,
            expires_at: None,
        })
    }
}

fn parse_json(raw: &str) -> Option<DecodedCode> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;

    let session_id = match lookup(object, PayloadField::SessionId)? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    // Session ids start at 1
    if session_id == 0 {
        return None;
    }
    let nonce = match lookup(object, PayloadField::Nonce)? {
        Value::String(s) => Nonce::new(s)?,
        Value::Number(n) => Nonce::new(n.to_string())?,
        _ => return None,
    };
    // A present but unreadable expiry makes the payload invalid
    let expires_at = match lookup(object, PayloadField::ExpiresAt) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(parse_timestamp(s)?),
        Some(_) => return None,
    };

    Some(DecodedCode {
        session_id: SessionId::new(session_id),
        nonce,
        expires_at,
    })
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one read as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
