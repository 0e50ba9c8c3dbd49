//! Worker observation hooks.
//!
//! Observers see every dispatch for diagnostics only. Whatever an observer
//! does, including failing or panicking, never changes what the worker does
//! with the message.

use crate::worker::DispatchError;
use relay_protocol::Message;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error raised by an observer. Logged by the worker and otherwise ignored.
#[derive(Debug, Error)]
#[error("Observer failed: {0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    /// Create a callback error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Receives lifecycle and per-message events from workers.
pub trait WorkerObserver: Send + Sync {
    /// Called once from [`Worker::ready`](crate::worker::Worker::ready).
    fn worker_ready(&self, _worker_id: usize, _channels: &[String]) {}

    /// Called before a message is dispatched to its consumer.
    ///
    /// # Errors
    ///
    /// Errors are logged and discarded.
    fn consumer_called(&self, channel: &str, message: &Message) -> Result<(), CallbackError>;

    /// Called after dispatch with its duration and failure, if any.
    ///
    /// # Errors
    ///
    /// Errors are logged and discarded.
    fn consumer_finished(
        &self,
        _channel: &str,
        _elapsed: Duration,
        _error: Option<&DispatchError>,
    ) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Logs every message at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl WorkerObserver for LoggingObserver {
    fn worker_ready(&self, worker_id: usize, channels: &[String]) {
        debug!(worker = worker_id, ?channels, "Worker ready");
    }

    fn consumer_called(&self, channel: &str, message: &Message) -> Result<(), CallbackError> {
        debug!(channel = %channel, fields = message.len(), "Consumer called");
        Ok(())
    }

    fn consumer_finished(
        &self,
        channel: &str,
        elapsed: Duration,
        error: Option<&DispatchError>,
    ) -> Result<(), CallbackError> {
        match error {
            None => debug!(channel = %channel, ?elapsed, "Consumer finished"),
            Some(e) => debug!(channel = %channel, ?elapsed, error = %e, "Consumer failed"),
        }
        Ok(())
    }
}

/// Fans events out to several observers in order.
///
/// The first error is returned after every observer has been called.
#[derive(Default, Clone)]
pub struct ObserverChain {
    observers: Vec<Arc<dyn WorkerObserver>>,
}

impl ObserverChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer.
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether the chain has no observers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl WorkerObserver for ObserverChain {
    fn worker_ready(&self, worker_id: usize, channels: &[String]) {
        for observer in &self.observers {
            observer.worker_ready(worker_id, channels);
        }
    }

    fn consumer_called(&self, channel: &str, message: &Message) -> Result<(), CallbackError> {
        let mut first = Ok(());
        for observer in &self.observers {
            let result = observer.consumer_called(channel, message);
            if first.is_ok() {
                first = result;
            }
        }
        first
    }

    fn consumer_finished(
        &self,
        channel: &str,
        elapsed: Duration,
        error: Option<&DispatchError>,
    ) -> Result<(), CallbackError> {
        let mut first = Ok(());
        for observer in &self.observers {
            let result = observer.consumer_finished(channel, elapsed, error);
            if first.is_ok() {
                first = result;
            }
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        called: AtomicUsize,
        fail: bool,
    }

    impl WorkerObserver for Counting {
        fn consumer_called(&self, _channel: &str, _message: &Message) -> Result<(), CallbackError> {
            self.called.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CallbackError::new("boom"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_chain_calls_every_observer() {
        let failing = Arc::new(Counting {
            fail: true,
            ..Default::default()
        });
        let ok = Arc::new(Counting::default());
        let chain = ObserverChain::new()
            .with(failing.clone())
            .with(ok.clone())
            .with(Arc::new(LoggingObserver));

        let result = chain.consumer_called("a", &Message::new());
        assert!(result.is_err());
        assert_eq!(failing.called.load(Ordering::SeqCst), 1);
        assert_eq!(ok.called.load(Ordering::SeqCst), 1);
        assert_eq!(chain.len(), 3);
        assert!(chain.consumer_finished("a", Duration::ZERO, None).is_ok());
    }
}
