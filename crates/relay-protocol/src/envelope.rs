//! Envelopes wrap a message with its routing metadata.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique envelope identifier.
pub type EnvelopeId = u64;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Generate a unique envelope ID.
#[must_use]
pub fn generate_envelope_id() -> EnvelopeId {
    let timestamp = now_nanos() as u64;
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// A message bound to the channel it was sent on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique envelope identifier.
    pub id: EnvelopeId,
    /// Target channel.
    pub channel: String,
    /// The message body.
    pub message: Message,
    /// Milliseconds since the Unix epoch when the envelope was created.
    pub created_at: u64,
}

impl Envelope {
    /// Wrap a message for the given channel.
    #[must_use]
    pub fn new(channel: impl Into<String>, message: Message) -> Self {
        Self {
            id: generate_envelope_id(),
            channel: channel.into(),
            message,
            created_at: (now_nanos() / 1_000_000) as u64,
        }
    }

    /// Split the envelope into its channel and message.
    #[must_use]
    pub fn into_parts(self) -> (String, Message) {
        (self.channel, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_creation() {
        let envelope = Envelope::new("http.request", Message::new().with("path", "/"));
        assert_eq!(envelope.channel, "http.request");
        assert!(envelope.created_at > 0);

        let (channel, message) = envelope.into_parts();
        assert_eq!(channel, "http.request");
        assert_eq!(message.get_str("path"), Some("/"));
    }

    #[test]
    fn test_unique_envelope_ids() {
        let id1 = generate_envelope_id();
        let id2 = generate_envelope_id();
        assert_ne!(id1, id2);
    }
}
