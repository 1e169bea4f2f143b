// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Routes flushed entries to the sinks bound to their channel.
//!
//! Delivery never fails towards the caller: a failed batch is retried entry by entry, a
//! failed entry is logged and skipped, and a channel without sinks goes to the
//! [`TracingSink`].

use core::time::Duration;
use std::collections::HashMap;
use tracing::{debug, error, warn};

use crate::clock::SharedClock;
use crate::config::Config;
use crate::entry::LogEntry;
use crate::http::{self, RetryStrategy};
use crate::sinks::{BrokerSink, FileSink, SearchBulkSink, Sink, TracingSink};

/// Channel that catches entries whose own channel has no binding.
pub const DEFAULT_CHANNEL: &str = "default";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no sink registered for channel {0:?}")]
    UnknownChannel(String),
}

/// Owns the sinks and the channel bindings that point at them.
///
/// A sink registered on several channels is a single instance, so a flush touching those
/// channels reuses its client and file handles.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Vec<Box<dyn Sink>>,
    bindings: HashMap<String, Vec<usize>>,
    default_channel: Option<String>,
}

impl SinkRegistry {
    #[must_use]
    pub fn new() -> Self {
        SinkRegistry::default()
    }

    /// Builds one sink per enabled destination and binds each to the configured database,
    /// http and job channels as well as [`DEFAULT_CHANNEL`].
    #[must_use]
    pub fn from_config(config: &Config, clock: SharedClock) -> Self {
        let mut registry = SinkRegistry::new();
        let channels = [
            config.database_channel.as_str(),
            config.http_channel.as_str(),
            config.job_channel.as_str(),
            DEFAULT_CHANNEL,
        ];

        if config.search.is_some() || config.broker.is_some() {
            let client = http::build_client(
                config.proxy_url.as_deref(),
                Duration::from_secs(config.http_timeout_secs),
            );
            let retry = RetryStrategy::from(config);
            if let Some(search) = &config.search {
                registry.register(
                    &channels,
                    Box::new(SearchBulkSink::new(search, client.clone(), retry, config.on_error)),
                );
            }
            if let Some(broker) = &config.broker {
                registry.register(
                    &channels,
                    Box::new(BrokerSink::new(broker, client, retry, config.on_error)),
                );
            }
        }
        if let Some(file) = &config.file {
            registry.register(&channels, Box::new(FileSink::new(file, clock)));
        }

        registry.set_default_channel(DEFAULT_CHANNEL);
        debug!(
            "DISPATCH | Registered {} sink(s) on channels {channels:?}",
            registry.sinks.len()
        );
        registry
    }

    /// Adds `sink` and binds it to every channel in `channels`.
    ///
    /// The sink is stored once whatever the number of channels, so a flush that spans
    /// several of them reaches the same instance once per channel group. Binding a channel
    /// twice to the same sink is a no-op.
    ///
    /// # Arguments
    ///
    /// * `channels` - Channel names the sink receives entries from
    /// * `sink` - The destination, owned by the registry from now on
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let mut registry = SinkRegistry::new();
    /// registry.register(&["database", "http"], Box::new(FileSink::new(&file, clock)));
    /// registry.set_default_channel("database");
    /// ```
    pub fn register(&mut self, channels: &[&str], sink: Box<dyn Sink>) {
        let index = self.sinks.len();
        self.sinks.push(sink);
        for channel in channels {
            let bound = self.bindings.entry((*channel).to_string()).or_default();
            if !bound.contains(&index) {
                bound.push(index);
            }
        }
    }

    pub fn set_default_channel(&mut self, channel: impl Into<String>) {
        self.default_channel = Some(channel.into());
    }

    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Names of the sinks an entry on `channel` would reach.
    pub fn sink_names(&self, channel: &str) -> Result<Vec<&str>, DispatchError> {
        Ok(self
            .resolve(channel)?
            .into_iter()
            .map(|index| self.sinks[index].name())
            .collect())
    }

    fn resolve(&self, channel: &str) -> Result<Vec<usize>, DispatchError> {
        let bound = |name: &str| {
            self.bindings
                .get(name)
                .filter(|indices| !indices.is_empty())
                .cloned()
        };
        bound(channel)
            .or_else(|| self.default_channel.as_deref().and_then(bound))
            .ok_or_else(|| DispatchError::UnknownChannel(channel.to_string()))
    }
}

/// What happened to one flush. Failures are already logged when this is returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub entries: usize,
    pub batch_failures: usize,
    pub write_failures: usize,
    /// Entries written through the fallback because their channel had no sink.
    pub fallback_entries: usize,
}

impl DispatchReport {
    fn absorb(&mut self, other: DispatchReport) {
        self.entries += other.entries;
        self.batch_failures += other.batch_failures;
        self.write_failures += other.write_failures;
        self.fallback_entries += other.fallback_entries;
    }
}

pub struct ChannelDispatcher {
    registry: SinkRegistry,
    fallback: TracingSink,
}

impl ChannelDispatcher {
    #[must_use]
    pub fn new(registry: SinkRegistry) -> Self {
        ChannelDispatcher {
            registry,
            fallback: TracingSink,
        }
    }

    /// Delivers `entries`, grouped by channel in order of first appearance.
    ///
    /// Each bound sink first gets the whole group through its batch interface. When that
    /// fails, or the sink has none, every entry is written on its own and a failing entry
    /// is logged and skipped. Channels that resolve to no sink go to the [`TracingSink`].
    ///
    /// # Returns
    ///
    /// A [`DispatchReport`] counting what was delivered and what failed. Failures are
    /// never raised to the caller.
    pub fn dispatch(&mut self, entries: Vec<LogEntry>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (channel, group) in group_by_channel(entries) {
            report.absorb(self.dispatch_channel(&channel, &group));
        }
        report
    }

    fn dispatch_channel(&mut self, channel: &str, entries: &[LogEntry]) -> DispatchReport {
        let mut report = DispatchReport {
            entries: entries.len(),
            ..DispatchReport::default()
        };

        let indices = match self.registry.resolve(channel) {
            Ok(indices) => indices,
            Err(e) => {
                debug!("DISPATCH | {e}, writing {} entries to the fallback", entries.len());
                for entry in entries {
                    if let Err(e) = self.fallback.write(entry) {
                        error!("DISPATCH | Fallback writer failed: {e}");
                        report.write_failures += 1;
                    }
                }
                report.fallback_entries = entries.len();
                return report;
            }
        };

        for index in indices {
            let sink = &mut self.registry.sinks[index];
            deliver(sink.as_mut(), entries, &mut report);
        }
        report
    }
}

fn deliver(sink: &mut dyn Sink, entries: &[LogEntry], report: &mut DispatchReport) {
    let batch_result = sink.as_batch().map(|batch| batch.write_batch(entries));
    match batch_result {
        Some(Ok(())) => return,
        Some(Err(e)) => {
            warn!(
                "DISPATCH | Batch delivery to {} failed: {e}, retrying entry by entry",
                sink.name()
            );
            report.batch_failures += 1;
        }
        None => {}
    }

    for entry in entries {
        if let Err(e) = sink.write(entry) {
            warn!("DISPATCH | Dropping entry for {}: {e}", sink.name());
            report.write_failures += 1;
        }
    }
}

fn group_by_channel(entries: Vec<LogEntry>) -> Vec<(String, Vec<LogEntry>)> {
    let mut groups: Vec<(String, Vec<LogEntry>)> = Vec::new();
    for entry in entries {
        match groups
            .iter_mut()
            .find(|(channel, _)| channel == entry.channel())
        {
            Some((_, group)) => group.push(entry),
            None => groups.push((entry.channel().to_string(), vec![entry])),
        }
    }
    groups
}
