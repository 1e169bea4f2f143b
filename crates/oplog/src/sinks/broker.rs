// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::BrokerConfig;
use crate::entry::LogEntry;
use crate::http::{self, RetryStrategy};
use crate::sinks::{BatchSink, OnError, Sink, SinkError};

const NAME: &str = "BROKER";
const KAFKA_JSON: &str = "application/vnd.kafka.json.v2+json";

/// Publishes entries to a topic through a broker REST proxy, one record per entry and one
/// request per batch.
#[derive(Debug, Clone)]
pub struct BrokerSink {
    client: Client,
    endpoint: String,
    retry: RetryStrategy,
    on_error: OnError,
}

impl BrokerSink {
    #[must_use]
    pub fn new(
        config: &BrokerConfig,
        client: Client,
        retry: RetryStrategy,
        on_error: OnError,
    ) -> Self {
        BrokerSink {
            client,
            endpoint: format!(
                "{}/topics/{}",
                config.url.trim_end_matches('/'),
                config.topic
            ),
            retry,
            on_error,
        }
    }

    fn deliver<'a>(&self, entries: impl Iterator<Item = &'a LogEntry>) -> Result<(), SinkError> {
        let records: Vec<Value> = entries
            .map(|entry| json!({ "value": entry.to_document() }))
            .collect();
        if records.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(&json!({ "records": records }))?;
        let request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, KAFKA_JSON)
            .body(body);
        http::send_with_retry(NAME, &request, self.retry)?;
        Ok(())
    }
}

impl BatchSink for BrokerSink {
    fn write_batch(&mut self, entries: &[LogEntry]) -> Result<(), SinkError> {
        self.on_error.handle(NAME, self.deliver(entries.iter()))
    }
}

impl Sink for BrokerSink {
    fn name(&self) -> &str {
        NAME
    }

    fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        self.on_error
            .handle(NAME, self.deliver(std::iter::once(entry)))
    }

    fn as_batch(&mut self) -> Option<&mut dyn BatchSink> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Fields, Level};
    use chrono::{TimeZone, Utc};
    use core::time::Duration;
    use mockito::Matcher;

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(
            "jobs",
            Level::Notice,
            message,
            Fields::new(),
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        )
    }

    fn sink(url: &str, on_error: OnError) -> BrokerSink {
        BrokerSink::new(
            &BrokerConfig {
                url: url.to_string(),
                topic: "app-logs".to_string(),
            },
            http::build_client(None, Duration::from_secs(2)),
            RetryStrategy::Immediate(2),
            on_error,
        )
    }

    #[test]
    fn test_batch_is_one_request_with_one_record_per_entry() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/topics/app-logs")
            .match_header("content-type", KAFKA_JSON)
            .match_body(Matcher::PartialJson(json!({
                "records": [
                    { "value": { "message": "first", "channel": "jobs", "level": "notice" } },
                    { "value": { "message": "second" } }
                ]
            })))
            .with_status(200)
            .expect(1)
            .create();

        sink(&server.url(), OnError::Propagate)
            .write_batch(&[entry("first"), entry("second")])
            .unwrap();
        mock.assert();
    }

    #[test]
    fn test_single_write() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/topics/app-logs")
            .match_body(Matcher::PartialJson(json!({
                "records": [{ "value": { "@timestamp": "2024-03-01T08:00:00.000Z" } }]
            })))
            .with_status(204)
            .create();

        sink(&server.url(), OnError::Propagate)
            .write(&entry("alone"))
            .unwrap();
        mock.assert();
    }

    #[test]
    fn test_rejection_propagates() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/topics/app-logs")
            .with_status(422)
            .expect(1)
            .create();

        let err = sink(&server.url(), OnError::Propagate)
            .write(&entry("bad"))
            .unwrap_err();
        mock.assert();
        assert!(matches!(err, SinkError::ClientRejection { status: 422, .. }));
    }

    #[test]
    fn test_swallow_reports_success() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/topics/app-logs")
            .with_status(503)
            .expect(2)
            .create();

        assert!(sink(&server.url(), OnError::Swallow)
            .write_batch(&[entry("lost")])
            .is_ok());
        mock.assert();
    }
}
