// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sql::QueryKind;

/// A statement the database driver finished executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEvent {
    pub sql: String,
    #[serde(default)]
    pub bindings: Vec<Value>,
    /// Raw elapsed time as reported by the driver, in (possibly fractional) milliseconds.
    pub elapsed_ms: f64,
    pub connection_name: String,
}

impl QueryEvent {
    pub fn new(
        sql: impl Into<String>,
        bindings: Vec<Value>,
        elapsed_ms: f64,
        connection_name: impl Into<String>,
    ) -> Self {
        QueryEvent {
            sql: sql.into(),
            bindings,
            elapsed_ms,
            connection_name: connection_name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelEventKind {
    Created,
    Updated,
    Deleted,
}

impl ModelEventKind {
    /// The write statement that produces this lifecycle event.
    #[must_use]
    pub fn query_kind(self) -> QueryKind {
        match self {
            ModelEventKind::Created => QueryKind::Insert,
            ModelEventKind::Updated => QueryKind::Update,
            ModelEventKind::Deleted => QueryKind::Delete,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModelEventKind::Created => "created",
            ModelEventKind::Updated => "updated",
            ModelEventKind::Deleted => "deleted",
        }
    }
}

/// A row-level lifecycle notification from the ORM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEvent {
    pub kind: ModelEventKind,
    pub model_type: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    pub connection_name: String,
    pub table: String,
    #[serde(default)]
    pub previous_attributes: Option<Map<String, Value>>,
    #[serde(default)]
    pub after_attributes: Option<Map<String, Value>>,
}

/// An HTTP request the host finished serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub route: Option<String>,
    pub status: u16,
    pub duration_ms: f64,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Processed,
    Failed,
    /// Put back on the queue for a later attempt.
    Released,
}

impl JobOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Processed => "processed",
            JobOutcome::Failed => "failed",
            JobOutcome::Released => "released",
        }
    }
}

/// A queued job the worker finished handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job: String,
    pub queue: String,
    pub connection: String,
    pub outcome: JobOutcome,
    #[serde(default)]
    pub attempts: u32,
    pub duration_ms: f64,
    #[serde(default)]
    pub error: Option<String>,
}
