// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Heuristic SQL introspection.
//!
//! These helpers only look for the handful of shapes an ORM emits for single-row writes.
//! They are not a parser: a statement they cannot read simply yields `None`.

use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

pub const TRUNCATION_SUFFIX: &str = "...[truncated]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    /// DDL, transaction control and anything else the pipeline does not log.
    Other,
}

impl QueryKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Select => "select",
            QueryKind::Insert => "insert",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
            QueryKind::Other => "other",
        }
    }

    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, QueryKind::Insert | QueryKind::Update | QueryKind::Delete)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[allow(clippy::expect_used)]
fn kind_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^[\s(]*(select|insert|replace|update|delete)\b")
            .expect("static query kind pattern")
    })
}

#[allow(clippy::expect_used)]
fn table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:from|into|update|table)\s+((?:[`"\[]?[\w$]+[`"\]]?\.)*[`"\[]?[\w$]+[`"\]]?)"#)
            .expect("static table pattern")
    })
}

#[allow(clippy::expect_used)]
fn row_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?is)\bwhere\b.*?\bid\b[`"\]]?\s*=\s*(?:(\?)|\$(\d+)|(\d+)|'([^']*)')"#)
            .expect("static row id pattern")
    })
}

/// Classifies a statement by its first keyword.
#[must_use]
pub fn query_kind(sql: &str) -> QueryKind {
    let Some(captures) = kind_pattern().captures(sql) else {
        return QueryKind::Other;
    };
    match captures[1].to_ascii_lowercase().as_str() {
        "select" => QueryKind::Select,
        "insert" | "replace" => QueryKind::Insert,
        "update" => QueryKind::Update,
        "delete" => QueryKind::Delete,
        _ => QueryKind::Other,
    }
}

/// Extracts the first table named after `from`, `into`, `update` or `table`.
///
/// Quoting is stripped and a schema qualifier is dropped, so `` `app`.`users` `` yields
/// `users`, the name a model event reports.
#[must_use]
pub fn table_name(sql: &str) -> Option<String> {
    let captures = table_pattern().captures(sql)?;
    let qualified = captures.get(1)?.as_str();
    let unquoted: String = qualified
        .chars()
        .filter(|c| !matches!(c, '`' | '"' | '[' | ']'))
        .collect();
    let name = unquoted.rsplit('.').next().unwrap_or_default();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Reads the row id a statement targets from its `where ... id = <x>` clause.
///
/// For a `?` placeholder the binding at the placeholder's ordinal position is used, `$n`
/// placeholders index the bindings directly, and inline literals are taken as-is. Inserts
/// rarely carry one since the id is not known before the row exists.
#[must_use]
pub fn row_id(sql: &str, bindings: &[Value]) -> Option<String> {
    let captures = row_id_pattern().captures(sql)?;

    if let Some(placeholder) = captures.get(1) {
        let ordinal = sql[..placeholder.start()].matches('?').count();
        return bindings.get(ordinal).and_then(scalar_to_string);
    }
    if let Some(position) = captures.get(2) {
        let position: usize = position.as_str().parse().ok()?;
        return bindings
            .get(position.checked_sub(1)?)
            .and_then(scalar_to_string);
    }
    captures
        .get(3)
        .or_else(|| captures.get(4))
        .map(|literal| literal.as_str().to_string())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Serializes bindings to JSON, capped at `max_bytes` (0 means uncapped).
///
/// The cut lands on a character boundary and is marked with [`TRUNCATION_SUFFIX`].
#[must_use]
pub fn serialize_bindings(bindings: &[Value], max_bytes: usize) -> String {
    let mut serialized = match serde_json::to_string(bindings) {
        Ok(serialized) => serialized,
        Err(e) => {
            tracing::debug!("Failed to serialize query bindings: {e}");
            return "[unserializable bindings]".to_string();
        }
    };
    if max_bytes == 0 || serialized.len() <= max_bytes {
        return serialized;
    }
    let mut cut = max_bytes;
    while !serialized.is_char_boundary(cut) {
        cut -= 1;
    }
    serialized.truncate(cut);
    serialized.push_str(TRUNCATION_SUFFIX);
    serialized
}

/// Rounds a driver-reported elapsed time to whole milliseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn round_duration_ms(elapsed_ms: f64) -> u64 {
    if !elapsed_ms.is_finite() || elapsed_ms <= 0.0 {
        return 0;
    }
    elapsed_ms.round() as u64
}
