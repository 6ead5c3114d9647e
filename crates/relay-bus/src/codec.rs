//! # Envelope Codec
//!
//! Converts between message bytes and [`Fields`].
//!
//! Device traffic mixes JSON objects with bare scalars (`ok`, `42`, `true`).
//! Bare scalars are wrapped under a configurable scalar key so every decoded
//! message is a field mapping. Reply metadata travels as reserved fields and
//! is lifted out of the mapping before it reaches application code.

use relay_types::{ClientError, DecodeError, Fields, Value};

/// Default key bare scalars are stored under.
pub const DEFAULT_VALUE_KEY: &str = "v";

/// Reserved field naming the reply topic.
pub const REPLY_TOPIC_FIELD: &str = "$reply";

/// Reserved field asking for a signed reply.
pub const REPLY_SIGNED_FIELD: &str = "$signed";

/// Result of decoding one message body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub fields: Fields,
    pub reply_topic: Option<String>,
    pub reply_signed: bool,
    pub error: Option<DecodeError>,
}

/// Encodes an outbound value.
///
/// Strings go out as their raw text; everything else is serialized as JSON.
///
/// # Errors
///
/// `ClientError::Serialization` if the value cannot be rendered.
pub fn encode(value: &Value) -> Result<Vec<u8>, ClientError> {
    match value {
        Value::String(text) => Ok(text.clone().into_bytes()),
        other => serde_json::to_vec(other).map_err(|e| ClientError::Serialization(e.to_string())),
    }
}

/// Decodes a message body into fields.
///
/// - Empty body: empty mapping.
/// - Body opening with `{` or `[`: parsed as a JSON object. An array is not
///   a field mapping, so it lands in the error branch below.
/// - Anything else is a bare scalar. Purely alphabetic text other than
///   `true`/`false` is taken as a string; the rest is parsed as a JSON scalar.
///   The result is stored under `value_key`.
///
/// If parsing fails the raw text is stored under `value_key` and the failure
/// is recorded in [`Decoded::error`].
#[must_use]
pub fn decode(raw: &[u8], value_key: &str) -> Decoded {
    let mut decoded = Decoded::default();
    if raw.is_empty() {
        return decoded;
    }

    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();

    let parsed = match trimmed.chars().next() {
        Some('{' | '[') => serde_json::from_str::<Fields>(trimmed),
        _ if is_bare_word(trimmed) => Ok(wrap(value_key, Value::String(trimmed.to_string()))),
        _ => serde_json::from_str::<Value>(trimmed).map(|v| wrap(value_key, v)),
    };

    match parsed {
        Ok(fields) => {
            decoded.fields = fields;
            extract_reply_fields(&mut decoded);
        }
        Err(e) => {
            decoded.error = Some(DecodeError::new(e.to_string()));
            decoded
                .fields
                .insert(value_key.to_string(), Value::String(text.into_owned()));
        }
    }

    decoded
}

fn wrap(value_key: &str, value: Value) -> Fields {
    let mut fields = Fields::new();
    fields.insert(value_key.to_string(), value);
    fields
}

/// Alphabetic-only text that is not a JSON boolean literal.
fn is_bare_word(text: &str) -> bool {
    !text.is_empty()
        && text.chars().all(char::is_alphabetic)
        && text != "true"
        && text != "false"
}

fn extract_reply_fields(decoded: &mut Decoded) {
    if let Some(reply) = decoded.fields.remove(REPLY_TOPIC_FIELD) {
        decoded.reply_topic = match reply {
            Value::String(topic) if !topic.is_empty() => Some(topic),
            _ => None,
        };
    }

    if let Some(signed) = decoded.fields.remove(REPLY_SIGNED_FIELD) {
        decoded.reply_signed = signed.as_bool().unwrap_or(false);
    }
}
