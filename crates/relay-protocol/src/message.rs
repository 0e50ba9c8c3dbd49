//! The application-level message envelope body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Conventional key holding the channel a consumer should reply on.
pub const REPLY_CHANNEL_KEY: &str = "reply_channel";

/// An opaque mapping of string keys to values.
///
/// No key is mandatory. A message is moved into the channel layer on send
/// and moved out to exactly one consumer on receive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, returning the message.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Get a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a field as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// The channel a consumer should reply on, if the producer set one.
    #[must_use]
    pub fn reply_channel(&self) -> Option<&str> {
        self.get_str(REPLY_CHANNEL_KEY)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the message has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the fields.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Consume the message, returning the underlying map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Message {
    type Error = Value;

    /// Convert a JSON object into a message, handing back anything else.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_builder() {
        let msg = Message::new()
            .with("path", "/index.html")
            .with("reply_channel", "http.response!abc");

        assert_eq!(msg.len(), 2);
        assert_eq!(msg.get_str("path"), Some("/index.html"));
        assert_eq!(msg.reply_channel(), Some("http.response!abc"));
        assert!(msg.get("missing").is_none());
    }

    #[test]
    fn test_message_from_json_object() {
        let msg = Message::try_from(json!({"status": 200})).unwrap();
        assert_eq!(msg.get("status"), Some(&json!(200)));

        assert!(Message::try_from(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_message_serializes_as_plain_map() {
        let msg = Message::new().with("text", "hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"text": "hi"}));
    }
}
