//! # relay-core
//!
//! Channel layers, routing, and the worker engine for Relay.
//!
//! This crate provides the building blocks behind a worker process:
//!
//! - **Channel layer** - Name-addressed message transport (send, group send, receive)
//! - **Router** - Maps channel names and globs to consumers
//! - **Worker** - Polls the layer and dispatches one message at a time
//! - **Worker group** - A fixed pool of workers sharing one layer and router
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Producer   │────▶│ ChannelLayer │────▶│   Worker    │────▶│  Consumer   │
//! └─────────────┘     └──────────────┘     └─────────────┘     └─────────────┘
//!                                                 │
//!                                                 ▼
//!                                          ┌─────────────┐
//!                                          │   Router    │
//!                                          └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tenvis_relay_core::{consumer_fn, shutdown, InMemoryChannelLayer, Router, Worker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let layer = Arc::new(InMemoryChannelLayer::new());
//!
//! let mut router = Router::new();
//! router.register("http.request", Arc::new(consumer_fn("view", |_channel, _message| async {
//!     Ok(())
//! })))?;
//! router.check_default(None)?;
//!
//! let (trigger, signal) = shutdown::channel();
//! let mut worker = Worker::new(layer, Arc::new(router));
//! worker.ready()?;
//! # trigger.trigger();
//! worker.run(signal).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod consumer;
pub mod group;
pub mod layer;
pub mod observer;
pub mod router;
pub mod shutdown;
pub mod worker;

pub use channel::ChannelId;
pub use consumer::{consumer_fn, Consumer, ConsumerError};
pub use group::WorkerGroup;
pub use layer::{ChannelLayer, GroupSendReport, InMemoryChannelLayer, InMemoryConfig, LayerError};
pub use observer::{CallbackError, LoggingObserver, ObserverChain, WorkerObserver};
pub use relay_protocol::Message;
pub use router::{ChannelFilter, Router, RouterError, DEFAULT_CHANNEL};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use worker::{DispatchError, Worker, WorkerError, WorkerOptions, WorkerState, WorkerStats};
