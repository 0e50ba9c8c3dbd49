//! Size-limited MessagePack codec for envelopes.
//!
//! A channel layer stores or transmits envelopes as single opaque blobs, so
//! there is no framing here: one blob is one envelope. The codec owns the
//! layer's message size limit, which applies to the encoded form.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::envelope::Envelope;
use crate::message::Message;

/// Default encoded size limit (1 MiB).
pub const DEFAULT_MAX_SIZE: usize = 1024 * 1024;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded envelope is over the size limit.
    #[error("Envelope of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Encoded (or received) size.
        size: usize,
        /// The codec's limit.
        limit: usize,
    },

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes envelopes to MessagePack blobs no larger than `max_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeCodec {
    max_size: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl EnvelopeCodec {
    /// Create a codec with the given encoded size limit.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// The encoded size limit.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Encode an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TooLarge`] if the encoded envelope is over
    /// the limit, or [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError> {
        let mut writer = BytesMut::new().writer();
        rmp_serde::encode::write_named(&mut writer, envelope)?;
        let data = writer.into_inner();

        if data.len() > self.max_size {
            return Err(ProtocolError::TooLarge {
                size: data.len(),
                limit: self.max_size,
            });
        }
        Ok(data.freeze())
    }

    /// Wrap `message` for `channel` in a fresh envelope and encode it.
    ///
    /// # Errors
    ///
    /// Same as [`EnvelopeCodec::encode`].
    pub fn encode_message(&self, channel: &str, message: Message) -> Result<Bytes, ProtocolError> {
        self.encode(&Envelope::new(channel, message))
    }

    /// Decode an envelope.
    ///
    /// Blobs over the limit are refused before deserializing, so a peer
    /// with a larger limit cannot force an oversized allocation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TooLarge`] for an oversized blob or
    /// [`ProtocolError::Decode`] if it is not a valid envelope.
    pub fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        if data.len() > self.max_size {
            return Err(ProtocolError::TooLarge {
                size: data.len(),
                limit: self.max_size,
            });
        }
        Ok(rmp_serde::from_slice(data)?)
    }
}
