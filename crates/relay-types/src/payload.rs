//! # Payload
//!
//! The decoded form of one inbound message together with the routing facts
//! the dispatcher attached to it.

use crate::errors::DecodeError;
use crate::qos::QoS;

/// Dynamically typed field value (null, bool, number, string, array, object).
pub use serde_json::Value;

/// Field mapping of a decoded message.
pub type Fields = serde_json::Map<String, Value>;

/// A message as seen by a subscriber callback.
///
/// `Clone` is a deep copy: the dispatcher clones one decoded payload per
/// callback, so mutations in one callback are never visible to another.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    /// Concrete topic the message was published on.
    pub topic: String,

    /// The registered filter this delivery matched, wildcards included.
    pub matched_filter: String,

    /// Segments bound by the filter's wildcards, left to right. A trailing
    /// multi-level wildcard contributes one `/`-joined element.
    pub wildcard_elements: Vec<String>,

    /// Application fields. Reply metadata has already been stripped.
    pub fields: Fields,

    /// Topic the sender wants a reply on.
    pub reply_topic: Option<String>,

    /// The sender wants the reply signed.
    pub reply_signed: bool,

    pub qos: QoS,

    pub retain: bool,

    /// The message arrived as a signed token and passed verification.
    pub validated: bool,

    /// Set when the body could not be parsed; `fields` then holds the raw
    /// text under the scalar key.
    pub decode_error: Option<DecodeError>,
}

impl Payload {
    /// Creates an empty payload for a topic.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Looks up a field.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the wildcard element at `index`.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<&str> {
        self.wildcard_elements.get(index).map(String::as_str)
    }

    /// Returns true if the sender asked for a reply.
    #[must_use]
    pub fn is_reply_requested(&self) -> bool {
        self.reply_topic.is_some()
    }
}
