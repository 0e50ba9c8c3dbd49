//! In-process reference channel layer.
//!
//! Messages live in per-channel FIFO queues inside a `DashMap`. Each queue is
//! popped under its shard lock, so concurrent receivers in one process never
//! see the same message twice. Envelopes are stored encoded, which gives the
//! layer the same size and serialization limits a networked layer has.

use super::{ChannelLayer, GroupSendReport, LayerError};
use crate::channel::{validate_channel_name, validate_group_name, ChannelId, PROCESS_SEPARATOR};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use relay_protocol::{generate_envelope_id, EnvelopeCodec, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, trace};

/// In-memory layer configuration.
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Maximum queued messages per channel.
    pub capacity: usize,
    /// How long a queued message stays deliverable.
    pub expiry: Duration,
    /// How long a group membership lasts without being refreshed.
    pub group_expiry: Duration,
    /// Maximum encoded message size in bytes.
    pub max_message_size: usize,
    /// How long a blocking receive waits before returning empty.
    pub receive_timeout: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            expiry: Duration::from_secs(60),
            group_expiry: Duration::from_secs(86_400),
            max_message_size: 1024 * 1024,
            receive_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct Queued {
    data: Bytes,
    enqueued: Instant,
}

/// A channel layer confined to the current process.
#[derive(Debug)]
pub struct InMemoryChannelLayer {
    /// Pending messages indexed by channel name.
    channels: DashMap<ChannelId, VecDeque<Queued>>,
    /// Group name -> member channel -> time added.
    groups: DashMap<String, HashMap<ChannelId, Instant>>,
    /// Woken on every successful send.
    notify: Notify,
    /// Rotates the first channel polled by `receive`.
    cursor: AtomicUsize,
    /// Enforces `max_message_size` on the encoded form.
    codec: EnvelopeCodec,
    config: InMemoryConfig,
}

impl InMemoryChannelLayer {
    /// Create a new layer with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(InMemoryConfig::default())
    }

    /// Create a new layer with custom configuration.
    #[must_use]
    pub fn with_config(config: InMemoryConfig) -> Self {
        info!("Creating in-memory channel layer with config: {:?}", config);
        Self {
            channels: DashMap::new(),
            groups: DashMap::new(),
            notify: Notify::new(),
            cursor: AtomicUsize::new(0),
            codec: EnvelopeCodec::new(config.max_message_size),
            config,
        }
    }

    /// Get the layer configuration.
    #[must_use]
    pub fn config(&self) -> &InMemoryConfig {
        &self.config
    }

    /// Number of messages queued on a channel, expired ones included.
    #[must_use]
    pub fn queued(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|q| q.len()).unwrap_or(0)
    }

    /// Current members of a group.
    #[must_use]
    pub fn group_members(&self, group: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .groups
            .get(group)
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Drop every queued message and group membership.
    pub fn flush(&self) {
        self.channels.clear();
        self.groups.clear();
        debug!("Flushed in-memory channel layer");
    }

    fn is_expired(&self, item: &Queued) -> bool {
        item.enqueued.elapsed() >= self.config.expiry
    }

    /// Pop the first live message from any of the channels, starting at a
    /// rotating offset so no channel is starved.
    fn try_pop(&self, channels: &[String]) -> Result<Option<(String, Message)>, LayerError> {
        if channels.is_empty() {
            return Ok(None);
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % channels.len();

        for offset in 0..channels.len() {
            let name = &channels[(start + offset) % channels.len()];
            let popped = {
                let Some(mut queue) = self.channels.get_mut(name.as_str()) else {
                    continue;
                };
                let mut found = None;
                while let Some(item) = queue.pop_front() {
                    if self.is_expired(&item) {
                        trace!(channel = %name, "Dropping expired message");
                        continue;
                    }
                    found = Some(item);
                    break;
                }
                found
            };
            self.channels.remove_if(name.as_str(), |_, q| q.is_empty());

            if let Some(item) = popped {
                let envelope = self.codec.decode(&item.data)?;
                return Ok(Some(envelope.into_parts()));
            }
        }

        Ok(None)
    }
}

impl Default for InMemoryChannelLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelLayer for InMemoryChannelLayer {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn local_only(&self) -> bool {
        true
    }

    fn capacity(&self, _channel: &str) -> usize {
        self.config.capacity
    }

    async fn send(&self, channel: &str, message: Message) -> Result<(), LayerError> {
        validate_channel_name(channel).map_err(|reason| LayerError::InvalidChannel {
            name: channel.to_string(),
            reason,
        })?;

        let data = self.codec.encode_message(channel, message)?;

        {
            let mut queue = self.channels.entry(channel.to_string()).or_default();
            if queue.len() >= self.config.capacity {
                let expiry = self.config.expiry;
                queue.retain(|item| item.enqueued.elapsed() < expiry);
            }
            if queue.len() >= self.config.capacity {
                return Err(LayerError::CapacityExceeded {
                    channel: channel.to_string(),
                    capacity: self.config.capacity,
                });
            }
            queue.push_back(Queued {
                data,
                enqueued: Instant::now(),
            });
            trace!(channel = %channel, queued = queue.len(), "Enqueued message");
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn group_send(
        &self,
        group: &str,
        message: Message,
    ) -> Result<GroupSendReport, LayerError> {
        validate_group_name(group).map_err(|reason| LayerError::InvalidGroup {
            name: group.to_string(),
            reason,
        })?;

        let members: Vec<ChannelId> = match self.groups.get_mut(group) {
            Some(mut members) => {
                let expiry = self.config.group_expiry;
                members.retain(|_, added| added.elapsed() < expiry);
                members.keys().cloned().collect()
            }
            None => Vec::new(),
        };

        let mut report = GroupSendReport::default();
        for member in members {
            match self.send(&member, message.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!(group = %group, channel = %member, error = %e, "Group member skipped");
                    report.failed.push(member);
                }
            }
        }

        trace!(
            group = %group,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Group send"
        );
        Ok(report)
    }

    async fn receive(
        &self,
        channels: &[String],
        block: bool,
    ) -> Result<Option<(String, Message)>, LayerError> {
        let deadline = tokio::time::Instant::now() + self.config.receive_timeout;

        loop {
            // Register interest before looking so a send between the check
            // and the wait still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = self.try_pop(channels)? {
                return Ok(Some(found));
            }
            if !block {
                return Ok(None);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn new_channel(&self, prefix: &str) -> Result<String, LayerError> {
        let invalid = |reason| LayerError::InvalidChannel {
            name: prefix.to_string(),
            reason,
        };
        if prefix.contains(PROCESS_SEPARATOR) {
            return Err(invalid("Channel prefix cannot contain '!'"));
        }
        validate_channel_name(prefix).map_err(invalid)?;

        loop {
            let name = format!("{prefix}{PROCESS_SEPARATOR}{:x}", generate_envelope_id());
            if !self.channels.contains_key(&name) {
                return Ok(name);
            }
        }
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<(), LayerError> {
        validate_group_name(group).map_err(|reason| LayerError::InvalidGroup {
            name: group.to_string(),
            reason,
        })?;
        validate_channel_name(channel).map_err(|reason| LayerError::InvalidChannel {
            name: channel.to_string(),
            reason,
        })?;

        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(channel.to_string(), Instant::now());
        debug!(group = %group, channel = %channel, "Added to group");
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<(), LayerError> {
        if let Some(mut members) = self.groups.get_mut(group) {
            if members.remove(channel).is_some() {
                debug!(group = %group, channel = %channel, "Removed from group");
            }
        }
        self.groups.remove_if(group, |_, members| members.is_empty());
        Ok(())
    }
}
