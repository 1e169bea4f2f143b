// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry point for hosts: one [`Recorder`] per process or worker.
//!
//! The host forwards raw events as they happen and calls [`Recorder::end_request`] or
//! [`Recorder::end_job`] at the boundary. Nothing leaves the process before a boundary
//! unless the buffer fills up.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::buffer::DeferredBuffer;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::correlator::{CorrelatorConfig, OperationCorrelator};
use crate::dispatcher::{ChannelDispatcher, DispatchReport, SinkRegistry};
use crate::entry::{field, Fields, Level, LogEntry};
use crate::event::{JobEvent, JobOutcome, ModelEvent, QueryEvent, RequestEvent};
use crate::sql;
use crate::transaction::{TransactionLevelSource, TransactionTracker};

pub struct Recorder {
    correlator: OperationCorrelator,
    buffer: DeferredBuffer,
    clock: SharedClock,
    http_channel: String,
    job_channel: String,
}

impl Recorder {
    pub fn new(
        config: &Config,
        sinks: SinkRegistry,
        level_source: Box<dyn TransactionLevelSource>,
        clock: SharedClock,
    ) -> Self {
        let tracker = TransactionTracker::new(level_source, clock.clone());
        let correlator =
            OperationCorrelator::new(CorrelatorConfig::from(config), tracker, clock.clone());
        let buffer = DeferredBuffer::new(
            ChannelDispatcher::new(sinks),
            config.max_buffered_entries,
            config.warn_on_limit,
            clock.clone(),
        );
        Recorder {
            correlator,
            buffer,
            clock,
            http_channel: config.http_channel.clone(),
            job_channel: config.job_channel.clone(),
        }
    }

    /// Builds the recorder with the sinks enabled in `config`.
    pub fn from_config(
        config: &Config,
        level_source: Box<dyn TransactionLevelSource>,
        clock: SharedClock,
    ) -> Self {
        let sinks = SinkRegistry::from_config(config, clock.clone());
        Recorder::new(config, sinks, level_source, clock)
    }

    pub fn record_query(&mut self, event: &QueryEvent) {
        let buffer = &mut self.buffer;
        self.correlator
            .on_query_executed(event, &mut |entry| buffer.defer_entry(entry));
    }

    pub fn record_model_event(&mut self, event: &ModelEvent) {
        let buffer = &mut self.buffer;
        self.correlator
            .on_model_event(event, &mut |entry| buffer.defer_entry(entry));
    }

    pub fn record_request(&mut self, event: &RequestEvent) {
        let entry = request_entry(&self.http_channel, event, self.clock.now());
        self.buffer.defer_entry(entry);
    }

    pub fn record_job(&mut self, event: &JobEvent) {
        let entry = job_entry(&self.job_channel, event, self.clock.now());
        self.buffer.defer_entry(entry);
    }

    /// Buffers a free-form entry.
    pub fn log(
        &mut self,
        channel: impl Into<String>,
        level: Level,
        message: impl Into<String>,
        fields: Fields,
    ) {
        self.buffer.defer(channel, level, message, fields);
    }

    /// Closes the current request.
    ///
    /// Pending writes are emitted as query-only entries, the buffer is flushed to every
    /// sink, and transaction ids are forgotten so the next request starts fresh.
    ///
    /// # Returns
    ///
    /// What the flush delivered. Sink failures are already logged and never raised.
    pub fn end_request(&mut self) -> DispatchReport {
        self.boundary()
    }

    /// Same as [`Recorder::end_request`], for queue workers.
    pub fn end_job(&mut self) -> DispatchReport {
        self.boundary()
    }

    /// Entries waiting in the buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.count()
    }

    /// Write queries still waiting for their lifecycle event.
    #[must_use]
    pub fn pending_queries(&self) -> usize {
        self.correlator.pending_count()
    }

    #[must_use]
    pub fn auto_flush_count(&self) -> u64 {
        self.buffer.auto_flush_count()
    }

    fn boundary(&mut self) -> DispatchReport {
        let buffer = &mut self.buffer;
        self.correlator
            .drain_pending(&mut |entry| buffer.defer_entry(entry));
        let report = self.buffer.flush();
        self.correlator.reset_transactions();
        report
    }
}

fn insert_optional(fields: &mut Fields, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), Value::String(value.clone()));
    }
}

fn request_entry(channel: &str, event: &RequestEvent, timestamp: DateTime<Utc>) -> LogEntry {
    let method = event.method.to_uppercase();
    let mut fields = Fields::new();
    fields.insert("method".to_string(), Value::String(method.clone()));
    fields.insert("path".to_string(), Value::String(event.path.clone()));
    insert_optional(&mut fields, "route", event.route.as_ref());
    fields.insert("status".to_string(), Value::from(event.status));
    fields.insert(
        field::DURATION_MS.to_string(),
        Value::from(sql::round_duration_ms(event.duration_ms)),
    );
    insert_optional(&mut fields, "ip", event.ip.as_ref());
    insert_optional(&mut fields, "user_id", event.user_id.as_ref());

    let level = match event.status {
        500.. => Level::Error,
        400..=499 => Level::Warning,
        _ => Level::Info,
    };
    LogEntry::new(
        channel,
        level,
        format!("{method} {} {}", event.path, event.status),
        fields,
        timestamp,
    )
}

fn job_entry(channel: &str, event: &JobEvent, timestamp: DateTime<Utc>) -> LogEntry {
    let mut fields = Fields::new();
    fields.insert("job".to_string(), Value::String(event.job.clone()));
    fields.insert("queue".to_string(), Value::String(event.queue.clone()));
    fields.insert(
        field::CONNECTION.to_string(),
        Value::String(event.connection.clone()),
    );
    fields.insert(
        "outcome".to_string(),
        Value::String(event.outcome.as_str().to_string()),
    );
    fields.insert("attempts".to_string(), Value::from(event.attempts));
    fields.insert(
        field::DURATION_MS.to_string(),
        Value::from(sql::round_duration_ms(event.duration_ms)),
    );
    insert_optional(&mut fields, "error", event.error.as_ref());

    let level = match event.outcome {
        JobOutcome::Failed => Level::Error,
        JobOutcome::Released => Level::Notice,
        JobOutcome::Processed => Level::Info,
    };
    LogEntry::new(
        channel,
        level,
        format!("Job {} {}", event.job, event.outcome.as_str()),
        fields,
        timestamp,
    )
}
