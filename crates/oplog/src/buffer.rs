// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory buffering of entries until the end of a request or job.

use serde_json::Value;
use std::mem;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::dispatcher::{ChannelDispatcher, DispatchReport};
use crate::entry::{Fields, Level, LogEntry};

/// Holds entries until [`DeferredBuffer::flush`] or until `max_entries` is reached.
///
/// With `max_entries == 0` the buffer grows until flushed.
pub struct DeferredBuffer {
    entries: Vec<LogEntry>,
    max_entries: usize,
    warn_on_limit: bool,
    auto_flush_count: u64,
    dispatcher: ChannelDispatcher,
    clock: SharedClock,
}

impl DeferredBuffer {
    #[must_use]
    pub fn new(
        dispatcher: ChannelDispatcher,
        max_entries: usize,
        warn_on_limit: bool,
        clock: SharedClock,
    ) -> Self {
        DeferredBuffer {
            entries: Vec::new(),
            max_entries,
            warn_on_limit,
            auto_flush_count: 0,
            dispatcher,
            clock,
        }
    }

    /// Buffers a new entry stamped with the current time.
    pub fn defer(
        &mut self,
        channel: impl Into<String>,
        level: Level,
        message: impl Into<String>,
        fields: Fields,
    ) {
        let entry = LogEntry::new(channel, level, message, fields, self.clock.now());
        self.defer_entry(entry);
    }

    pub fn defer_entry(&mut self, entry: LogEntry) {
        self.entries.push(entry);
        if self.max_entries > 0 && self.entries.len() >= self.max_entries {
            self.auto_flush();
        }
    }

    /// Delivers and forgets every buffered entry.
    pub fn flush(&mut self) -> DispatchReport {
        if self.entries.is_empty() {
            return DispatchReport::default();
        }
        let entries = mem::take(&mut self.entries);
        debug!("BUFFER | Flushing {} entries", entries.len());
        self.dispatcher.dispatch(entries)
    }

    /// Drops every buffered entry without delivering it.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn auto_flush_count(&self) -> u64 {
        self.auto_flush_count
    }

    fn auto_flush(&mut self) {
        self.auto_flush_count += 1;
        let flushed = self.entries.len();
        warn!(
            "BUFFER | Buffer limit of {} entries reached, flushing early (auto flush #{})",
            self.max_entries, self.auto_flush_count
        );

        if self.warn_on_limit {
            let channel = self
                .entries
                .last()
                .map(|entry| entry.channel().to_string())
                .unwrap_or_default();
            let mut fields = Fields::new();
            fields.insert("limit".to_string(), Value::from(self.max_entries));
            fields.insert("logsFlushed".to_string(), Value::from(flushed));
            fields.insert(
                "autoFlushCount".to_string(),
                Value::from(self.auto_flush_count),
            );
            let warning = LogEntry::new(
                channel,
                Level::Warning,
                "Log buffer limit reached, flushing early",
                fields,
                self.clock.now(),
            );
            self.dispatcher.dispatch(vec![warning]);
        }

        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::dispatcher::SinkRegistry;
    use crate::sinks::memory::MemorySink;
    use proptest::prelude::*;
    use serde_json::json;

    fn buffer(max_entries: usize, warn_on_limit: bool) -> (DeferredBuffer, MemorySink) {
        let sink = MemorySink::batching();
        let mut registry = SinkRegistry::new();
        registry.register(&["database", "http"], Box::new(sink.clone()));
        let buffer = DeferredBuffer::new(
            ChannelDispatcher::new(registry),
            max_entries,
            warn_on_limit,
            system_clock(),
        );
        (buffer, sink)
    }

    proptest! {
        #[test]
        fn test_flush_delivers_every_deferred_entry(n in 1usize..50) {
            let (mut buffer, sink) = buffer(50, true);
            for i in 0..n {
                buffer.defer("database", Level::Info, format!("entry {i}"), Fields::new());
            }
            prop_assert_eq!(buffer.count(), n);

            let report = buffer.flush();

            prop_assert_eq!(sink.received().len(), n);
            prop_assert_eq!(report.entries, n);
            prop_assert_eq!(buffer.count(), 0);
            prop_assert_eq!(buffer.auto_flush_count(), 0);
        }
    }

    #[test]
    fn test_reaching_limit_auto_flushes_once() {
        let (mut buffer, sink) = buffer(3, true);
        for i in 0..3 {
            buffer.defer("database", Level::Info, format!("entry {i}"), Fields::new());
        }

        assert_eq!(buffer.auto_flush_count(), 1);
        assert_eq!(buffer.count(), 0);
        assert_eq!(
            sink.messages(),
            vec![
                "Log buffer limit reached, flushing early",
                "entry 0",
                "entry 1",
                "entry 2"
            ]
        );
        let warning = &sink.received()[0];
        assert_eq!(warning.level(), Level::Warning);
        assert_eq!(warning.field("limit"), Some(&json!(3)));
        assert_eq!(warning.field("logsFlushed"), Some(&json!(3)));
        assert_eq!(warning.field("autoFlushCount"), Some(&json!(1)));

        buffer.defer("database", Level::Info, "entry 3", Fields::new());
        assert_eq!(buffer.count(), 1);
        assert_eq!(buffer.auto_flush_count(), 1);
    }

    #[test]
    fn test_limit_without_warning() {
        let (mut buffer, sink) = buffer(2, false);
        buffer.defer("http", Level::Info, "a", Fields::new());
        buffer.defer("http", Level::Info, "b", Fields::new());

        assert_eq!(buffer.auto_flush_count(), 1);
        assert_eq!(sink.messages(), vec!["a", "b"]);
    }

    #[test]
    fn test_zero_limit_never_auto_flushes() {
        let (mut buffer, sink) = buffer(0, true);
        for _ in 0..500 {
            buffer.defer("database", Level::Debug, "x", Fields::new());
        }
        assert_eq!(buffer.count(), 500);
        assert!(sink.received().is_empty());
        assert_eq!(buffer.auto_flush_count(), 0);
    }

    #[test]
    fn test_clear_discards() {
        let (mut buffer, sink) = buffer(10, true);
        buffer.defer("database", Level::Info, "gone", Fields::new());
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.flush(), DispatchReport::default());
        assert!(sink.received().is_empty());
    }

    #[test]
    fn test_flush_never_fails_when_sinks_do() {
        let sink = MemorySink {
            batch_capable: true,
            fail_batches: true,
            fail_writes: true,
            ..MemorySink::default()
        };
        let mut registry = SinkRegistry::new();
        registry.register(&["database"], Box::new(sink));
        let mut buffer =
            DeferredBuffer::new(ChannelDispatcher::new(registry), 10, true, system_clock());

        buffer.defer("database", Level::Error, "boom", Fields::new());
        let report = buffer.flush();

        assert_eq!(report.write_failures, 1);
        assert_eq!(buffer.count(), 0);
    }
}
