// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Ordered field map carried by every entry.
pub type Fields = Map<String, Value>;

/// Field names written by the correlator, shared with the sinks and tests.
pub mod field {
    pub const QUERY: &str = "query";
    pub const QUERY_TYPE: &str = "query_type";
    pub const IS_SLOW_QUERY: &str = "is_slow_query";
    pub const DURATION_MS: &str = "duration_ms";
    pub const BINDINGS: &str = "bindings";
    pub const CONNECTION: &str = "connection";
    pub const TABLE: &str = "table";
    pub const TRANSACTION_ID: &str = "transaction_id";
    pub const MODEL: &str = "model";
    pub const MODEL_ID: &str = "model_id";
    pub const PREVIOUS_VALUE: &str = "previous_value";
    pub const AFTER_VALUE: &str = "after_value";
    /// Per-entry routing hint read by the search and file sinks.
    pub const INDEX: &str = "index";
}

/// Severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Level {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
            Level::Alert => "alert",
            Level::Emergency => "emergency",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured log record.
///
/// Entries are immutable once built: the pipeline moves or clones them but never edits one
/// in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    channel: String,
    level: Level,
    message: String,
    fields: Fields,
    timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        channel: impl Into<String>,
        level: Level,
        message: impl Into<String>,
        fields: Fields,
        timestamp: DateTime<Utc>,
    ) -> Self {
        LogEntry {
            channel: channel.into(),
            level,
            message: message.into(),
            fields,
            timestamp,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn level(&self) -> Level {
        self.level
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The routing index requested by the entry, if it carries a non-blank one.
    #[must_use]
    pub fn target_index(&self) -> Option<&str> {
        match self.fields.get(field::INDEX) {
            Some(Value::String(index)) if !index.trim().is_empty() => Some(index.trim()),
            _ => None,
        }
    }

    /// The JSON document shipped to every sink.
    ///
    /// ```json
    /// {"@timestamp":"2024-01-01T00:00:00.000Z","channel":"database","level":"info","message":"...","context":{...}}
    /// ```
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut document = Map::with_capacity(5);
        document.insert(
            "@timestamp".to_string(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        document.insert("channel".to_string(), Value::String(self.channel.clone()));
        document.insert(
            "level".to_string(),
            Value::String(self.level.as_str().to_string()),
        );
        document.insert("message".to_string(), Value::String(self.message.clone()));
        document.insert("context".to_string(), Value::Object(self.fields.clone()));
        Value::Object(document)
    }

    /// Serializes the document to a single line, substituting a minimal marker record when
    /// the entry cannot be encoded so the delivered count is never silently short.
    #[must_use]
    pub fn to_json_line(&self) -> String {
        match serde_json::to_string(&self.to_document()) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize log entry, shipping error marker: {e}");
                self.error_marker(&e.to_string()).to_string()
            }
        }
    }

    fn error_marker(&self, reason: &str) -> Value {
        serde_json::json!({
            "@timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "channel": self.channel,
            "level": Level::Error.as_str(),
            "message": "log entry could not be serialized",
            "context": { "serialization_error": reason },
        })
    }
}
