// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk delivery to a search cluster.
//!
//! Entries are grouped by their `index` field and each group is written with one
//! NDJSON request to `{url}/_bulk`. A 2xx answer can still carry per-item failures; those
//! are summarized in the log and never retried.

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::entry::LogEntry;
use crate::http::{self, RetryStrategy};
use crate::sinks::{BatchSink, OnError, Sink, SinkError};

const NAME: &str = "BULK";
const NDJSON: &str = "application/x-ndjson";
const BULK_ACTIONS: [&str; 4] = ["index", "create", "update", "delete"];

/// Outcome of a bulk request that reported `errors: true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkSummary {
    pub failed_count: usize,
    pub total_count: usize,
    /// `type: reason` of the first failed item.
    pub first_error: Option<String>,
}

/// Reads a bulk response body. Returns `None` when the request fully succeeded or the
/// body cannot be understood.
#[must_use]
pub fn verify_bulk_response(body: &str) -> Option<BulkSummary> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("{NAME} | Ignoring unreadable bulk response: {e}");
            return None;
        }
    };
    if parsed.get("errors").and_then(Value::as_bool) != Some(true) {
        return None;
    }

    let items = parsed
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let mut summary = BulkSummary {
        failed_count: 0,
        total_count: items.len(),
        first_error: None,
    };

    for item in items {
        let Some(result) = BULK_ACTIONS.iter().find_map(|action| item.get(*action)) else {
            continue;
        };
        let Some(status) = result.get("status").and_then(Value::as_u64) else {
            continue;
        };
        if (200..300).contains(&status) {
            continue;
        }
        summary.failed_count += 1;
        if summary.first_error.is_none() {
            let error = result.get("error");
            let kind = error
                .and_then(|e| e.get("type"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            let reason = error
                .and_then(|e| e.get("reason"))
                .and_then(Value::as_str)
                .unwrap_or("");
            summary.first_error = Some(format!("{kind}: {reason}"));
        }
    }
    Some(summary)
}

#[derive(Debug, Clone)]
pub struct SearchBulkSink {
    client: Client,
    endpoint: String,
    default_index: String,
    api_key: Option<String>,
    retry: RetryStrategy,
    on_error: OnError,
}

impl SearchBulkSink {
    #[must_use]
    pub fn new(
        config: &SearchConfig,
        client: Client,
        retry: RetryStrategy,
        on_error: OnError,
    ) -> Self {
        SearchBulkSink {
            client,
            endpoint: format!("{}/_bulk", config.url.trim_end_matches('/')),
            default_index: config.default_index.clone(),
            api_key: config.api_key.clone(),
            retry,
            on_error,
        }
    }

    fn index_for<'a>(&'a self, entry: &'a LogEntry) -> &'a str {
        entry.target_index().unwrap_or(&self.default_index)
    }

    fn deliver(&self, entries: &[&LogEntry]) -> Result<(), SinkError> {
        let mut groups: Vec<(&str, Vec<&LogEntry>)> = Vec::new();
        for &entry in entries {
            let index = self.index_for(entry);
            match groups.iter_mut().find(|(name, _)| *name == index) {
                Some((_, group)) => group.push(entry),
                None => groups.push((index, vec![entry])),
            }
        }

        for (index, group) in groups {
            self.send_group(index, &group)?;
        }
        Ok(())
    }

    fn send_group(&self, index: &str, entries: &[&LogEntry]) -> Result<(), SinkError> {
        let action = serde_json::to_string(&json!({ "index": { "_index": index } }))?;
        let mut body = String::new();
        for entry in entries {
            body.push_str(&action);
            body.push('\n');
            body.push_str(&entry.to_json_line());
            body.push('\n');
        }

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, NDJSON)
            .body(body);
        if let Some(api_key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("ApiKey {api_key}"));
        }

        let response = http::send_with_retry(NAME, &request, self.retry)?;
        let text = match response.text() {
            Ok(text) => text,
            Err(e) => {
                debug!("{NAME} | Unable to read bulk response body: {e}");
                return Ok(());
            }
        };
        if let Some(summary) = verify_bulk_response(&text) {
            warn!(
                "{NAME} | Bulk request to index {index} partially failed: failedCount={} totalCount={} firstError={}",
                summary.failed_count,
                summary.total_count,
                summary.first_error.as_deref().unwrap_or("none")
            );
        }
        Ok(())
    }
}

impl BatchSink for SearchBulkSink {
    fn write_batch(&mut self, entries: &[LogEntry]) -> Result<(), SinkError> {
        if entries.is_empty() {
            return Ok(());
        }
        let entries: Vec<&LogEntry> = entries.iter().collect();
        self.on_error.handle(NAME, self.deliver(&entries))
    }
}

impl Sink for SearchBulkSink {
    fn name(&self) -> &str {
        NAME
    }

    fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        self.on_error.handle(NAME, self.deliver(&[entry]))
    }

    fn as_batch(&mut self) -> Option<&mut dyn BatchSink> {
        Some(self)
    }
}
