// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # oplog
//!
//! Turns database write queries, model lifecycle notifications, HTTP request completions and
//! queued-job completions into structured log entries, correlates the query and lifecycle
//! halves of the same write into one record, buffers entries in memory and delivers them in
//! batches to a search-engine bulk API, a message-broker REST proxy or local JSON-lines files.
//!
//! ```text
//!   host events
//!       │
//!       v
//!   ┌──────────────────────┐     ┌────────────────────┐
//!   │ OperationCorrelator  │────>│ TransactionTracker │
//!   └──────────┬───────────┘     └────────────────────┘
//!              │ LogEntry
//!              v
//!   ┌──────────────────────┐
//!   │    DeferredBuffer    │  (auto-flush at capacity)
//!   └──────────┬───────────┘
//!              v
//!   ┌──────────────────────┐
//!   │  ChannelDispatcher   │  (batch first, per-entry fallback)
//!   └──────────┬───────────┘
//!              v
//!   SearchBulkSink / BrokerSink / FileSink
//! ```
//!
//! Everything runs synchronously on the thread that handles the current request or job.
//! The [`recorder::Recorder`] facade wires the pieces together and owns the request/job
//! boundary.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

/// Wall-clock abstraction used for eviction windows and calendar days
pub mod clock;

/// Environment-driven configuration
pub mod config;

/// The in-memory buffer that defers entries until a flush
pub mod buffer;

/// Matches query executions with model lifecycle events
pub mod correlator;

/// Channel routing and guarded delivery to sinks
pub mod dispatcher;

/// Log entry and level types
pub mod entry;

/// Host event shapes consumed by the pipeline
pub mod event;

/// Blocking HTTP client construction and retry
pub mod http;

/// Facade owning the per-process pipeline state
pub mod recorder;

/// Delivery targets
pub mod sinks;

/// Heuristic SQL introspection
pub mod sql;

/// Per-connection transaction ids
pub mod transaction;
