//! Consumers handle messages delivered on a channel.

use crate::layer::LayerError;
use async_trait::async_trait;
use relay_protocol::Message;
use std::future::Future;
use std::marker::PhantomData;
use thiserror::Error;

/// Errors a consumer can report.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The consumer rejected or failed to process the message.
    #[error("Consumer failed: {0}")]
    Failed(String),

    /// A channel layer call made by the consumer failed.
    #[error("Channel layer error: {0}")]
    Layer(#[from] LayerError),

    /// The consumer panicked; the payload message is kept.
    #[error("Consumer panicked: {0}")]
    Panicked(String),

    /// Any other application error.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ConsumerError {
    /// Shorthand for [`ConsumerError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// An application handler for messages on one or more channels.
///
/// A worker awaits `handle` to completion before polling again, so a
/// consumer only ever sees one message at a time per worker.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Handle one message received on `channel`.
    async fn handle(&self, channel: &str, message: Message) -> Result<(), ConsumerError>;

    /// A name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A consumer built from an async closure. See [`consumer_fn`].
pub struct FnConsumer<F, Fut> {
    name: String,
    func: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a [`Consumer`].
///
/// ```rust
/// use tenvis_relay_core::consumer::{consumer_fn, ConsumerError};
///
/// let echo = consumer_fn("echo", |channel: String, _message| async move {
///     println!("got a message on {channel}");
///     Ok::<(), ConsumerError>(())
/// });
/// ```
pub fn consumer_fn<F, Fut>(name: impl Into<String>, func: F) -> FnConsumer<F, Fut>
where
    F: Fn(String, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ConsumerError>> + Send,
{
    FnConsumer {
        name: name.into(),
        func,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> Consumer for FnConsumer<F, Fut>
where
    F: Fn(String, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ConsumerError>> + Send,
{
    async fn handle(&self, channel: &str, message: Message) -> Result<(), ConsumerError> {
        (self.func)(channel.to_string(), message).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
