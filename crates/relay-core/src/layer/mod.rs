//! Channel layer abstraction.
//!
//! A channel layer is the name-addressed transport workers poll. It offers
//! point-to-point sends, group fan-out, and a receive restricted to an
//! explicit set of channel names. Implementations must guarantee that
//! concurrent `receive` calls never hand the same message to two callers.

pub mod memory;

use async_trait::async_trait;
use relay_protocol::{Message, ProtocolError};
use std::fmt;
use thiserror::Error;

pub use memory::{InMemoryChannelLayer, InMemoryConfig};

/// Channel layer errors.
#[derive(Debug, Error)]
pub enum LayerError {
    /// The channel queue is full.
    #[error("Channel {channel} is over capacity ({capacity})")]
    CapacityExceeded {
        /// The channel that rejected the message.
        channel: String,
        /// Its configured capacity.
        capacity: usize,
    },

    /// The encoded message exceeds the layer's size limit.
    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Invalid channel name.
    #[error("Invalid channel name {name:?}: {reason}")]
    InvalidChannel {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Invalid group name.
    #[error("Invalid group name {name:?}: {reason}")]
    InvalidGroup {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Envelope encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(#[source] ProtocolError),

    /// Backend-specific failure.
    #[error("{0}")]
    Other(String),
}

impl From<ProtocolError> for LayerError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::TooLarge { size, limit } => LayerError::MessageTooLarge { size, limit },
            other => LayerError::Codec(other),
        }
    }
}

/// Outcome of a group send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupSendReport {
    /// Number of member channels the message was enqueued on.
    pub delivered: usize,
    /// Member channels the message could not be enqueued on.
    pub failed: Vec<String>,
}

impl GroupSendReport {
    /// Whether every member received the message.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A name-addressed message transport.
#[async_trait]
pub trait ChannelLayer: Send + Sync + fmt::Debug {
    /// Get the backend name (e.g., "memory").
    fn name(&self) -> &'static str;

    /// Whether this layer instance can only be used inside one process.
    fn local_only(&self) -> bool;

    /// The per-channel capacity enforced by this layer.
    fn capacity(&self, channel: &str) -> usize;

    /// Enqueue a message on a channel.
    ///
    /// Never blocks indefinitely; a full channel is reported as
    /// [`LayerError::CapacityExceeded`].
    async fn send(&self, channel: &str, message: Message) -> Result<(), LayerError>;

    /// Fan a message out to every channel currently in the group.
    ///
    /// A member that cannot take the message is skipped and listed in the
    /// report; it never stops delivery to the remaining members.
    async fn group_send(&self, group: &str, message: Message)
        -> Result<GroupSendReport, LayerError>;

    /// Receive one message from any of the given channels.
    ///
    /// Returns `Ok(None)` if nothing arrived within the layer's poll window.
    /// With `block == false` the call returns immediately.
    ///
    /// Must be cancel safe: dropping the future before it resolves must not
    /// lose a message, since workers race it against shutdown.
    async fn receive(
        &self,
        channels: &[String],
        block: bool,
    ) -> Result<Option<(String, Message)>, LayerError>;

    /// Create a fresh, unused process-specific channel name (`prefix!suffix`).
    async fn new_channel(&self, prefix: &str) -> Result<String, LayerError>;

    /// Add a channel to a group.
    async fn group_add(&self, group: &str, channel: &str) -> Result<(), LayerError>;

    /// Remove a channel from a group. Removing a non-member is not an error.
    async fn group_discard(&self, group: &str, channel: &str) -> Result<(), LayerError>;
}
