// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pairs write queries with the model lifecycle events they cause.
//!
//! The database driver reports a statement as soon as it finishes; the ORM reports the
//! created/updated/deleted event right after. Neither knows about the other, so the
//! correlator parks every write query for a short window under a correlation key
//! `connection:table:kind:rowId` (`*` when the row id could not be read) and, when the
//! lifecycle event arrives, folds both into one entry carrying the SQL, its timing and the
//! before/after attribute snapshots.
//!
//! ```text
//!   QueryEvent ──> classify ──┬── select ──> query-only entry (unless ignored)
//!                             ├── write  ──> pending[key] ──┐
//!                             └── other  ──> dropped        │ exact key, else most recent
//!   ModelEvent ───────────────────────────────────────────> match ──> combined entry
//!                                                            │ miss
//!                                                            └──────> lifecycle-only entry
//! ```
//!
//! Pending queries older than [`PENDING_WINDOW_SECS`] are emitted as query-only entries the
//! next time any event arrives, so nothing parked is ever lost.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::entry::{field, Fields, Level, LogEntry};
use crate::event::{ModelEvent, QueryEvent};
use crate::sql::{self, QueryKind};
use crate::transaction::TransactionTracker;

/// How long a write query waits for its lifecycle event.
pub const PENDING_WINDOW_SECS: i64 = 5;

const WILDCARD_ROW_ID: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatorConfig {
    pub channel: String,
    pub slow_query_threshold_ms: u64,
    /// Case-insensitive substrings; a read query containing any of them is not logged.
    pub ignore_patterns: Vec<String>,
    pub log_read_queries: bool,
    pub max_bindings_size_bytes: usize,
}

impl From<&Config> for CorrelatorConfig {
    fn from(config: &Config) -> Self {
        CorrelatorConfig {
            channel: config.database_channel.clone(),
            slow_query_threshold_ms: config.slow_query_threshold_ms,
            ignore_patterns: config.ignore_patterns.clone(),
            log_read_queries: config.log_read_queries,
            max_bindings_size_bytes: config.max_bindings_size_bytes,
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        CorrelatorConfig::from(&Config::default())
    }
}

#[derive(Debug, Clone)]
struct PendingQuery {
    sql: String,
    bindings: String,
    duration_ms: u64,
    is_slow: bool,
    transaction_id: Option<String>,
    observed_at: DateTime<Utc>,
    connection: String,
    table: Option<String>,
    query_kind: QueryKind,
    row_id: Option<String>,
}

pub struct OperationCorrelator {
    config: CorrelatorConfig,
    tracker: TransactionTracker,
    clock: SharedClock,
    pending: HashMap<String, PendingQuery>,
}

impl OperationCorrelator {
    pub fn new(
        mut config: CorrelatorConfig,
        tracker: TransactionTracker,
        clock: SharedClock,
    ) -> Self {
        for pattern in &mut config.ignore_patterns {
            *pattern = pattern.to_lowercase();
        }
        OperationCorrelator {
            config,
            tracker,
            clock,
            pending: HashMap::new(),
        }
    }

    /// Handles one executed statement.
    ///
    /// Expired pending writes are emitted first. A read is emitted straight away when read
    /// logging is on and it matches no ignore pattern. A write is held for up to
    /// [`PENDING_WINDOW_SECS`] waiting for its lifecycle event. Other statements are dropped.
    pub fn on_query_executed(&mut self, event: &QueryEvent, emit: &mut dyn FnMut(LogEntry)) {
        self.evict_expired(emit);

        let kind = sql::query_kind(&event.sql);
        match kind {
            QueryKind::Select => self.on_read_query(event, emit),
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete => {
                self.on_write_query(event, kind, emit);
            }
            QueryKind::Other => {}
        }
    }

    /// Pairs a lifecycle event with its pending write, first by exact key, then with the
    /// most recent pending write on the same connection, table and kind. Without a match
    /// the event is emitted on its own.
    pub fn on_model_event(&mut self, event: &ModelEvent, emit: &mut dyn FnMut(LogEntry)) {
        self.evict_expired(emit);

        let kind = event.kind.query_kind();
        let key = correlation_key(
            &event.connection_name,
            &event.table,
            kind,
            event.primary_key.as_deref(),
        );

        let matched = match self.pending.remove(&key) {
            Some(pending) => Some(pending),
            None => self.take_most_recent(&event.connection_name, &event.table, kind),
        };

        let entry = match matched {
            Some(pending) => self.combined_entry(event, &pending),
            None => {
                let transaction_id = self.tracker.id_for(&event.connection_name);
                self.lifecycle_entry(event, transaction_id)
            }
        };
        emit(entry);
    }

    /// Emits every pending query as a query-only entry and forgets it.
    pub fn drain_pending(&mut self, emit: &mut dyn FnMut(LogEntry)) {
        let mut drained: Vec<PendingQuery> = self.pending.drain().map(|(_, p)| p).collect();
        drained.sort_by_key(|pending| pending.observed_at);
        for pending in drained {
            emit(self.query_entry(&pending));
        }
    }

    /// Forgets pending queries and transaction ids without emitting anything.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.tracker.clear();
    }

    pub fn reset_transactions(&mut self) {
        self.tracker.clear();
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn on_read_query(&mut self, event: &QueryEvent, emit: &mut dyn FnMut(LogEntry)) {
        if !self.config.log_read_queries || self.is_ignored(&event.sql) {
            return;
        }
        let pending = self.capture(event, QueryKind::Select);
        emit(self.query_entry(&pending));
    }

    fn on_write_query(
        &mut self,
        event: &QueryEvent,
        kind: QueryKind,
        emit: &mut dyn FnMut(LogEntry),
    ) {
        let pending = self.capture(event, kind);
        let Some(table) = pending.table.as_deref() else {
            debug!("Unable to read table name from write query, logging it uncorrelated");
            emit(self.query_entry(&pending));
            return;
        };

        let key = correlation_key(
            &pending.connection,
            table,
            kind,
            pending.row_id.as_deref(),
        );
        if let Some(displaced) = self.pending.insert(key, pending) {
            emit(self.query_entry(&displaced));
        }
    }

    fn capture(&mut self, event: &QueryEvent, kind: QueryKind) -> PendingQuery {
        let duration_ms = sql::round_duration_ms(event.elapsed_ms);
        let row_id = if kind.is_write() {
            sql::row_id(&event.sql, &event.bindings)
        } else {
            None
        };
        PendingQuery {
            sql: event.sql.clone(),
            bindings: sql::serialize_bindings(&event.bindings, self.config.max_bindings_size_bytes),
            duration_ms,
            is_slow: duration_ms >= self.config.slow_query_threshold_ms,
            transaction_id: self.tracker.id_for(&event.connection_name),
            observed_at: self.clock.now(),
            connection: event.connection_name.clone(),
            table: sql::table_name(&event.sql),
            query_kind: kind,
            row_id,
        }
    }

    fn is_ignored(&self, sql: &str) -> bool {
        if self.config.ignore_patterns.is_empty() {
            return false;
        }
        let sql = sql.to_lowercase();
        self.config
            .ignore_patterns
            .iter()
            .any(|pattern| sql.contains(pattern.as_str()))
    }

    // Linear scan: the pending set only holds the writes of the last few seconds.
    fn take_most_recent(
        &mut self,
        connection: &str,
        table: &str,
        kind: QueryKind,
    ) -> Option<PendingQuery> {
        let key = self
            .pending
            .iter()
            .filter(|(_, p)| {
                p.query_kind == kind
                    && p.connection == connection
                    && p.table.as_deref() == Some(table)
            })
            .max_by_key(|(_, p)| p.observed_at)
            .map(|(key, _)| key.clone())?;
        self.pending.remove(&key)
    }

    fn evict_expired(&mut self, emit: &mut dyn FnMut(LogEntry)) {
        let now = self.clock.now();
        let window = Duration::seconds(PENDING_WINDOW_SECS);
        let expired_keys: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now - p.observed_at > window)
            .map(|(key, _)| key.clone())
            .collect();
        if expired_keys.is_empty() {
            return;
        }

        let mut expired: Vec<PendingQuery> = expired_keys
            .iter()
            .filter_map(|key| self.pending.remove(key))
            .collect();
        expired.sort_by_key(|pending| pending.observed_at);
        debug!(
            "Emitting {} write queries that never saw a lifecycle event",
            expired.len()
        );
        for pending in expired {
            emit(self.query_entry(&pending));
        }
    }

    fn query_entry(&self, pending: &PendingQuery) -> LogEntry {
        let message = match pending.table.as_deref() {
            Some(table) => format!("Executed {} query on {table}", pending.query_kind),
            None => format!("Executed {} query", pending.query_kind),
        };
        LogEntry::new(
            self.config.channel.as_str(),
            level_for(pending.is_slow),
            message,
            query_fields(pending),
            pending.observed_at,
        )
    }

    fn combined_entry(&self, event: &ModelEvent, pending: &PendingQuery) -> LogEntry {
        let mut fields = model_fields(event);
        fields.extend(query_fields(pending));
        insert_snapshots(&mut fields, event);
        LogEntry::new(
            self.config.channel.as_str(),
            level_for(pending.is_slow),
            format!("{} {}", event.model_type, event.kind.as_str()),
            fields,
            self.clock.now(),
        )
    }

    fn lifecycle_entry(&self, event: &ModelEvent, transaction_id: Option<String>) -> LogEntry {
        let mut fields = model_fields(event);
        fields.insert(
            field::CONNECTION.to_string(),
            Value::String(event.connection_name.clone()),
        );
        fields.insert(field::TABLE.to_string(), Value::String(event.table.clone()));
        if let Some(transaction_id) = transaction_id {
            fields.insert(
                field::TRANSACTION_ID.to_string(),
                Value::String(transaction_id),
            );
        }
        insert_snapshots(&mut fields, event);
        LogEntry::new(
            self.config.channel.as_str(),
            Level::Info,
            format!("{} {}", event.model_type, event.kind.as_str()),
            fields,
            self.clock.now(),
        )
    }
}

fn correlation_key(connection: &str, table: &str, kind: QueryKind, row_id: Option<&str>) -> String {
    format!(
        "{connection}:{table}:{kind}:{}",
        row_id.unwrap_or(WILDCARD_ROW_ID)
    )
}

fn level_for(is_slow: bool) -> Level {
    if is_slow {
        Level::Warning
    } else {
        Level::Info
    }
}

fn model_fields(event: &ModelEvent) -> Fields {
    let mut fields = Fields::new();
    fields.insert(field::MODEL.to_string(), Value::String(event.model_type.clone()));
    fields.insert(
        field::MODEL_ID.to_string(),
        event
            .primary_key
            .clone()
            .map_or(Value::Null, Value::String),
    );
    fields
}

fn query_fields(pending: &PendingQuery) -> Fields {
    let mut fields = Fields::new();
    fields.insert(field::QUERY.to_string(), Value::String(pending.sql.clone()));
    fields.insert(
        field::QUERY_TYPE.to_string(),
        Value::String(pending.query_kind.as_str().to_string()),
    );
    fields.insert(field::IS_SLOW_QUERY.to_string(), Value::Bool(pending.is_slow));
    fields.insert(field::DURATION_MS.to_string(), Value::from(pending.duration_ms));
    fields.insert(
        field::BINDINGS.to_string(),
        Value::String(pending.bindings.clone()),
    );
    fields.insert(
        field::CONNECTION.to_string(),
        Value::String(pending.connection.clone()),
    );
    if let Some(table) = &pending.table {
        fields.insert(field::TABLE.to_string(), Value::String(table.clone()));
    }
    if let Some(transaction_id) = &pending.transaction_id {
        fields.insert(
            field::TRANSACTION_ID.to_string(),
            Value::String(transaction_id.clone()),
        );
    }
    fields
}

fn insert_snapshots(fields: &mut Fields, event: &ModelEvent) {
    if let Some(previous) = &event.previous_attributes {
        fields.insert(
            field::PREVIOUS_VALUE.to_string(),
            Value::Object(previous.clone()),
        );
    }
    if let Some(after) = &event.after_attributes {
        fields.insert(field::AFTER_VALUE.to_string(), Value::Object(after.clone()));
    }
}
