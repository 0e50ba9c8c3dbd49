//! # relay-protocol
//!
//! Message envelope definitions for the Relay worker engine.
//!
//! Producers hand a [`Message`] to a channel layer together with a channel
//! name. The layer wraps both in an [`Envelope`] and stores or transmits it
//! as a size-limited MessagePack blob produced by an [`EnvelopeCodec`].
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{EnvelopeCodec, Message};
//!
//! let codec = EnvelopeCodec::new(64 * 1024);
//! let message = Message::new().with("path", "/");
//!
//! let encoded = codec.encode_message("http.request", message).unwrap();
//! let decoded = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded.channel, "http.request");
//! assert_eq!(decoded.message.get_str("path"), Some("/"));
//! ```

pub mod codec;
pub mod envelope;
pub mod message;

pub use codec::{EnvelopeCodec, ProtocolError, DEFAULT_MAX_SIZE};
pub use envelope::{generate_envelope_id, Envelope, EnvelopeId};
pub use message::Message;
