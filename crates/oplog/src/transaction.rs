// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::clock::SharedClock;

/// How long a transaction id is kept, in seconds.
pub const TRANSACTION_TTL_SECS: i64 = 60 * 60;

pub const TRANSACTION_ID_PREFIX: &str = "txn-";

/// Reports how deeply nested the open transactions on a connection are.
///
/// Implemented by the host on top of its database driver. A level of 0 means no
/// transaction is open.
pub trait TransactionLevelSource: Send {
    fn transaction_level(&self, connection: &str) -> anyhow::Result<u32>;
}

impl<F> TransactionLevelSource for F
where
    F: Fn(&str) -> anyhow::Result<u32> + Send,
{
    fn transaction_level(&self, connection: &str) -> anyhow::Result<u32> {
        self(connection)
    }
}

/// A source for hosts that never open transactions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransactions;

impl TransactionLevelSource for NoTransactions {
    fn transaction_level(&self, _connection: &str) -> anyhow::Result<u32> {
        Ok(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TransactionRecord {
    id: String,
    connection: String,
    level: u32,
    observed_at: DateTime<Utc>,
}

/// Maps `(connection, nesting level)` to an opaque transaction id.
///
/// Ids are best-effort attribution: any failure to read the level yields `None`.
pub struct TransactionTracker {
    source: Box<dyn TransactionLevelSource>,
    clock: SharedClock,
    records: HashMap<String, TransactionRecord>,
}

impl TransactionTracker {
    pub fn new(source: Box<dyn TransactionLevelSource>, clock: SharedClock) -> Self {
        TransactionTracker {
            source,
            clock,
            records: HashMap::new(),
        }
    }

    /// Returns the id of the transaction currently open on `connection`, if any.
    pub fn id_for(&mut self, connection: &str) -> Option<String> {
        let level = match self.source.transaction_level(connection) {
            Ok(level) => level,
            Err(e) => {
                debug!("Unable to read transaction level for connection {connection}: {e:#}");
                return None;
            }
        };

        if level == 0 {
            self.records.retain(|_, record| record.connection != connection);
            return None;
        }

        let now = self.clock.now();
        self.collect_garbage(connection, level, now);

        let record = self
            .records
            .entry(record_key(connection, level))
            .or_insert_with(|| TransactionRecord {
                id: format!("{TRANSACTION_ID_PREFIX}{}", Uuid::new_v4()),
                connection: connection.to_string(),
                level,
                observed_at: now,
            });
        Some(record.id.clone())
    }

    /// Drops every record. Called at request and job boundaries.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // Nested commits and rollbacks can collapse several levels between two queries, so any
    // record deeper than the current level belongs to a transaction that no longer exists.
    fn collect_garbage(&mut self, connection: &str, level: u32, now: DateTime<Utc>) {
        let ttl = Duration::seconds(TRANSACTION_TTL_SECS);
        self.records.retain(|_, record| {
            record.connection != connection
                || (record.level <= level && now - record.observed_at <= ttl)
        });
    }
}

fn record_key(connection: &str, level: u32) -> String {
    format!("{connection}:{level}")
}
