//! # Relay Worker
//!
//! Bootstrapping for Relay worker processes: configuration, the built-in
//! consumers, metrics, and the sequence that turns them into running
//! workers.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod consumers;
pub mod metrics;

pub use bootstrap::{Bootstrap, BootstrapHooks, ConfigurationError, NoHooks, Prepared, Runner};
pub use config::Config;
