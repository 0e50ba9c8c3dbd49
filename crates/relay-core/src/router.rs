//! Channel-to-consumer routing.
//!
//! Routes map a channel pattern to a consumer. A pattern is either an exact
//! channel name or a glob (`*`, `?`, `[...]`). Resolution rules:
//!
//! 1. An exact route always wins over any glob route.
//! 2. Among glob routes, the first one registered that matches wins.
//! 3. Registering an identical pattern again replaces its consumer in place.
//!
//! Routes are registered during startup; workers share the router behind an
//! `Arc` and only read it afterwards.

use crate::channel::{validate_channel_name, ChannelId};
use crate::consumer::Consumer;
use glob::Pattern;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// The reserved front-door channel carrying inbound requests.
pub const DEFAULT_CHANNEL: &str = "http.request";

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No route matches the channel.
    #[error("No route for channel: {0}")]
    NoRoute(String),

    /// A route or filter pattern could not be parsed.
    #[error("Invalid channel pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Nothing handles the default channel.
    #[error("No consumer registered for default channel {0:?}")]
    NoDefaultConsumer(String),

    /// Several glob routes claim the default channel and none is exact.
    #[error("Default channel {channel:?} is matched by several patterns: {patterns:?}")]
    AmbiguousDefault {
        /// The default channel.
        channel: String,
        /// The competing patterns, in registration order.
        patterns: Vec<String>,
    },
}

impl RouterError {
    /// Whether the error means the router is misconfigured and workers
    /// must not start.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::NoRoute(_))
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn compile(pattern: &str) -> Result<Pattern, RouterError> {
    Pattern::new(pattern).map_err(|e| RouterError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

struct GlobRoute {
    pattern: Pattern,
    consumer: Arc<dyn Consumer>,
}

/// Maps channel names to consumers.
pub struct Router {
    default_channel: ChannelId,
    /// Exact routes indexed by channel name.
    exact: HashMap<ChannelId, Arc<dyn Consumer>>,
    /// Glob routes in registration order.
    globs: Vec<GlobRoute>,
}

impl Router {
    /// Create an empty router whose default channel is [`DEFAULT_CHANNEL`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_channel(DEFAULT_CHANNEL)
    }

    /// Create an empty router with a custom default channel.
    #[must_use]
    pub fn with_default_channel(channel: impl Into<ChannelId>) -> Self {
        Self {
            default_channel: channel.into(),
            exact: HashMap::new(),
            globs: Vec::new(),
        }
    }

    /// The reserved default channel.
    #[must_use]
    pub fn default_channel(&self) -> &str {
        &self.default_channel
    }

    /// Register a consumer for an exact channel name or glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidPattern`] if the pattern is neither a
    /// valid channel name nor a valid glob.
    pub fn register(
        &mut self,
        pattern: &str,
        consumer: Arc<dyn Consumer>,
    ) -> Result<&mut Self, RouterError> {
        if is_glob(pattern) {
            let compiled = compile(pattern)?;
            match self
                .globs
                .iter()
                .position(|route| route.pattern.as_str() == pattern)
            {
                Some(index) => {
                    debug!(pattern = %pattern, consumer = consumer.name(), "Replacing glob route");
                    self.globs[index].consumer = consumer;
                }
                None => {
                    debug!(pattern = %pattern, consumer = consumer.name(), "Registered glob route");
                    self.globs.push(GlobRoute {
                        pattern: compiled,
                        consumer,
                    });
                }
            }
        } else {
            validate_channel_name(pattern).map_err(|reason| RouterError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: reason.to_string(),
            })?;
            debug!(channel = %pattern, consumer = consumer.name(), "Registered route");
            if self.exact.insert(pattern.to_string(), consumer).is_some() {
                debug!(channel = %pattern, "Replaced earlier route");
            }
        }
        Ok(self)
    }

    /// Find the consumer for a concrete channel name.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NoRoute`] if no pattern matches.
    pub fn resolve(&self, channel: &str) -> Result<Arc<dyn Consumer>, RouterError> {
        if let Some(consumer) = self.exact.get(channel) {
            return Ok(consumer.clone());
        }
        self.globs
            .iter()
            .find(|route| route.pattern.matches(channel))
            .map(|route| route.consumer.clone())
            .ok_or_else(|| RouterError::NoRoute(channel.to_string()))
    }

    /// Validate that the default channel resolves to exactly one consumer.
    ///
    /// With `override_consumer`, that consumer becomes the exact route for
    /// the default channel before validation, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NoDefaultConsumer`] if nothing matches, or
    /// [`RouterError::AmbiguousDefault`] if there is no exact route and more
    /// than one glob matches.
    pub fn check_default(
        &mut self,
        override_consumer: Option<Arc<dyn Consumer>>,
    ) -> Result<(), RouterError> {
        if let Some(consumer) = override_consumer {
            info!(
                channel = %self.default_channel,
                consumer = consumer.name(),
                "Installing default consumer override"
            );
            self.exact.insert(self.default_channel.clone(), consumer);
            return Ok(());
        }

        if self.exact.contains_key(&self.default_channel) {
            return Ok(());
        }

        let matching: Vec<String> = self
            .globs
            .iter()
            .filter(|route| route.pattern.matches(&self.default_channel))
            .map(|route| route.pattern.as_str().to_string())
            .collect();

        match matching.len() {
            0 => Err(RouterError::NoDefaultConsumer(self.default_channel.clone())),
            1 => Ok(()),
            _ => Err(RouterError::AmbiguousDefault {
                channel: self.default_channel.clone(),
                patterns: matching,
            }),
        }
    }

    /// All exact channel names with a route, sorted.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.exact.keys().cloned().collect();
        names.sort();
        names
    }

    /// The concrete channel names a worker with `filter` should poll.
    ///
    /// Candidates are the exact routes plus the default channel whenever a
    /// route, exact or glob, resolves it. Other glob-only channels cannot be
    /// polled. Exclusions win over inclusions.
    #[must_use]
    pub fn expand_channel_names(&self, filter: &ChannelFilter) -> Vec<String> {
        let default = self
            .resolve(&self.default_channel)
            .is_ok()
            .then_some(&self.default_channel);

        self.exact
            .keys()
            .chain(default)
            .filter(|name| filter.allows(name))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.globs.len()
    }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("default_channel", &self.default_channel)
            .field("channels", &self.channels())
            .field(
                "globs",
                &self
                    .globs
                    .iter()
                    .map(|r| r.pattern.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Include/exclude glob filters narrowing the channels a worker polls.
#[derive(Debug, Clone, Default)]
pub struct ChannelFilter {
    only: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl ChannelFilter {
    /// A filter that allows every channel.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Compile include and exclude patterns.
    ///
    /// An empty include list allows every channel.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidPattern`] for an unparsable pattern.
    pub fn new<I, E, S, T>(only: I, exclude: E) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = S>,
        E: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Ok(Self {
            only: only
                .into_iter()
                .map(|p| compile(p.as_ref()))
                .collect::<Result<_, _>>()?,
            exclude: exclude
                .into_iter()
                .map(|p| compile(p.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Whether a channel passes the filter.
    #[must_use]
    pub fn allows(&self, channel: &str) -> bool {
        let included = self.only.is_empty() || self.only.iter().any(|p| p.matches(channel));
        included && !self.exclude.iter().any(|p| p.matches(channel))
    }
}
