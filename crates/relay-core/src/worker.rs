//! The worker control loop.
//!
//! A worker polls the channel layer for the channels its router knows about,
//! resolves each message to a consumer and awaits that consumer before
//! polling again. Exactly one message is in flight per worker; parallelism
//! comes from running several workers (see [`WorkerGroup`](crate::group::WorkerGroup)).
//!
//! ```text
//!  Created ──ready()──▶ Ready ──run()──▶ Running ──shutdown──▶ Stopped
//! ```
//!
//! Nothing that happens to a single message stops the loop: routing
//! failures, consumer errors, consumer panics and observer failures are all
//! logged and contained. Only the shutdown signal ends `run`.

use crate::consumer::ConsumerError;
use crate::layer::ChannelLayer;
use crate::observer::{CallbackError, WorkerObserver};
use crate::router::{ChannelFilter, Router, RouterError};
use crate::shutdown::Shutdown;
use futures_util::FutureExt;
use relay_protocol::Message;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, not yet warmed up.
    Created,
    /// Channel set computed and readiness announced.
    Ready,
    /// Inside the poll loop.
    Running,
    /// The loop has exited.
    Stopped,
}

/// Worker lifecycle errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A lifecycle call was made out of order.
    #[error("Worker {worker} cannot {action} while {state:?}")]
    InvalidState {
        /// Worker id.
        worker: usize,
        /// The attempted call.
        action: &'static str,
        /// The state the worker was in.
        state: WorkerState,
    },

    /// The filters left nothing to poll.
    #[error("Worker {0} has no channels to listen on")]
    NoChannels(usize),

    /// A worker group needs at least one member.
    #[error("Worker group size must be at least 1")]
    InvalidGroupSize,
}

/// Why a received message was not handled successfully.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No route matched the channel.
    #[error(transparent)]
    Routing(#[from] RouterError),

    /// The consumer failed or panicked.
    #[error("Consumer {consumer} failed: {source}")]
    Consumer {
        /// The consumer's name.
        consumer: String,
        /// The underlying failure.
        #[source]
        source: ConsumerError,
    },
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Use the layer's blocking receive (bounded by its poll window).
    pub block: bool,
    /// Pause after an empty non-blocking receive.
    pub idle_backoff: Duration,
    /// Pause after a failed receive.
    pub error_backoff: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            block: true,
            idle_backoff: Duration::from_millis(10),
            error_backoff: Duration::from_millis(100),
        }
    }
}

/// Counters collected by a worker's loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Messages taken off the layer.
    pub received: u64,
    /// Messages whose consumer succeeded.
    pub processed: u64,
    /// Messages whose consumer failed or panicked.
    pub consumer_errors: u64,
    /// Messages with no matching route.
    pub routing_errors: u64,
    /// Failed receive calls.
    pub receive_errors: u64,
}

impl WorkerStats {
    /// Add another worker's counters to these.
    pub fn merge(&mut self, other: &WorkerStats) {
        self.received += other.received;
        self.processed += other.processed;
        self.consumer_errors += other.consumer_errors;
        self.routing_errors += other.routing_errors;
        self.receive_errors += other.receive_errors;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Sleep, returning early on shutdown.
async fn pause(shutdown: &mut Shutdown, duration: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.triggered() => {}
    }
}

/// A single poll-and-dispatch loop over one layer/router pair.
pub struct Worker {
    id: usize,
    layer: Arc<dyn ChannelLayer>,
    router: Arc<Router>,
    observer: Option<Arc<dyn WorkerObserver>>,
    filter: ChannelFilter,
    options: WorkerOptions,
    /// Concrete channels to poll, fixed by `ready()`.
    channels: Vec<String>,
    state: WorkerState,
    stats: WorkerStats,
}

impl Worker {
    /// Create a worker polling every channel the router can expand.
    #[must_use]
    pub fn new(layer: Arc<dyn ChannelLayer>, router: Arc<Router>) -> Self {
        Self {
            id: 0,
            layer,
            router,
            observer: None,
            filter: ChannelFilter::all(),
            options: WorkerOptions::default(),
            channels: Vec::new(),
            state: WorkerState::Created,
            stats: WorkerStats::default(),
        }
    }

    /// Set the id used in logs and observer events.
    #[must_use]
    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    /// Attach an observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WorkerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Narrow the polled channels with include/exclude patterns.
    #[must_use]
    pub fn with_filter(mut self, filter: ChannelFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Override loop tuning.
    #[must_use]
    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    /// The worker id.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// The channels this worker polls. Empty before `ready()`.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Counters from the last run.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Whether the underlying layer is confined to one process.
    #[must_use]
    pub fn local_only(&self) -> bool {
        self.layer.local_only()
    }

    /// Compute the channel set and announce readiness.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidState`] unless the worker is freshly
    /// created, or [`WorkerError::NoChannels`] if the filters exclude every
    /// routed channel.
    pub fn ready(&mut self) -> Result<(), WorkerError> {
        self.channels = self.check_ready()?;

        let channels = &self.channels;
        let id = self.id;
        self.observe("worker_ready", |observer| {
            observer.worker_ready(id, channels);
            Ok(())
        });

        self.state = WorkerState::Ready;
        debug!(worker = self.id, channels = ?self.channels, "Worker ready");
        Ok(())
    }

    /// The channel set `ready()` would use, without changing any state.
    pub(crate) fn check_ready(&self) -> Result<Vec<String>, WorkerError> {
        self.expect_state(WorkerState::Created, "become ready")?;
        let channels = self.router.expand_channel_names(&self.filter);
        if channels.is_empty() {
            return Err(WorkerError::NoChannels(self.id));
        }
        Ok(channels)
    }

    /// Run the poll loop until `shutdown` fires.
    ///
    /// A message already handed to a consumer is always finished before the
    /// loop exits.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidState`] unless `ready()` succeeded first.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<WorkerStats, WorkerError> {
        self.expect_state(WorkerState::Ready, "run")?;
        self.state = WorkerState::Running;
        info!(
            worker = self.id,
            layer = self.layer.name(),
            channels = ?self.channels,
            "Worker listening"
        );

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let received = tokio::select! {
                biased;

                _ = shutdown.triggered() => break,
                result = self.layer.receive(&self.channels, self.options.block) => result,
            };

            match received {
                Ok(Some((channel, message))) => self.dispatch(&channel, message).await,
                Ok(None) => {
                    if !self.options.block {
                        pause(&mut shutdown, self.options.idle_backoff).await;
                    }
                }
                Err(e) => {
                    self.stats.receive_errors += 1;
                    error!(worker = self.id, error = %e, "Receive failed");
                    pause(&mut shutdown, self.options.error_backoff).await;
                }
            }
        }

        self.state = WorkerState::Stopped;
        info!(
            worker = self.id,
            processed = self.stats.processed,
            consumer_errors = self.stats.consumer_errors,
            routing_errors = self.stats.routing_errors,
            "Worker stopped"
        );
        Ok(self.stats)
    }

    /// Route and handle one message, containing every failure.
    async fn dispatch(&mut self, channel: &str, message: Message) {
        self.stats.received += 1;

        let consumer = match self.router.resolve(channel) {
            Ok(consumer) => consumer,
            Err(e) => {
                self.stats.routing_errors += 1;
                error!(
                    worker = self.id,
                    channel = %channel,
                    error = %e,
                    "Discarding unroutable message"
                );
                let failure = DispatchError::Routing(e);
                self.observe("consumer_finished", |observer| {
                    observer.consumer_finished(channel, Duration::ZERO, Some(&failure))
                });
                return;
            }
        };

        self.observe("consumer_called", |observer| {
            observer.consumer_called(channel, &message)
        });
        let fields: Vec<String> = message.iter().map(|(key, _)| key.clone()).collect();

        let started = Instant::now();
        let outcome = AssertUnwindSafe(consumer.handle(channel, message))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(ConsumerError::Panicked(panic_message(payload.as_ref()))),
        }
        .map(|source| DispatchError::Consumer {
            consumer: consumer.name().to_string(),
            source,
        });

        match &failure {
            None => self.stats.processed += 1,
            Some(e) => {
                self.stats.consumer_errors += 1;
                error!(
                    worker = self.id,
                    channel = %channel,
                    fields = ?fields,
                    error = %e,
                    "Consumer failed"
                );
            }
        }

        self.observe("consumer_finished", |observer| {
            observer.consumer_finished(channel, elapsed, failure.as_ref())
        });
    }

    /// Call the observer, swallowing its errors and panics.
    fn observe<F>(&self, event: &'static str, call: F)
    where
        F: FnOnce(&dyn WorkerObserver) -> Result<(), CallbackError>,
    {
        let Some(observer) = &self.observer else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| call(observer.as_ref()))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(worker = self.id, event, error = %e, "Observer failed"),
            Err(payload) => warn!(
                worker = self.id,
                event,
                panic = %panic_message(payload.as_ref()),
                "Observer panicked"
            ),
        }
    }

    fn expect_state(&self, expected: WorkerState, action: &'static str) -> Result<(), WorkerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WorkerError::InvalidState {
                worker: self.id,
                action,
                state: self.state,
            })
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("layer", &self.layer.name())
            .field("state", &self.state)
            .field("channels", &self.channels)
            .field("stats", &self.stats)
            .finish()
    }
}
