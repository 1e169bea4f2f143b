// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery targets.
//!
//! Every sink accepts single entries through [`Sink::write`]. Sinks that can ship many
//! entries in one outbound call also expose a [`BatchSink`] through [`Sink::as_batch`];
//! the dispatcher prefers that path and falls back to single writes when it fails.

use tracing::{error, warn};

use crate::entry::LogEntry;

pub mod broker;
pub mod file;
#[cfg(test)]
pub(crate) mod memory;
pub mod retention;
pub mod search;
pub mod tracing_sink;

pub use broker::BrokerSink;
pub use file::FileSink;
pub use search::SearchBulkSink;
pub use tracing_sink::TracingSink;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Connection failure or 5xx that survived every retry.
    #[error("request failed after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },
    /// 4xx: the destination refused the payload, retrying would not help.
    #[error("request rejected with status {status}: {body}")]
    ClientRejection { status: u16, body: String },
    #[error("failed to serialize entry: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),
}

/// What an adapter does with a delivery error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    /// Log the error and report success to the caller.
    #[default]
    Swallow,
    /// Hand the error to the caller so the dispatcher's fallback can engage.
    Propagate,
}

impl OnError {
    pub fn handle(self, sink: &str, result: Result<(), SinkError>) -> Result<(), SinkError> {
        match (self, result) {
            (_, Ok(())) => Ok(()),
            (OnError::Swallow, Err(e)) => {
                error!("{sink} | Dropping log delivery: {e}");
                Ok(())
            }
            (OnError::Propagate, Err(e)) => {
                warn!("{sink} | Log delivery failed: {e}");
                Err(e)
            }
        }
    }
}

/// A target that accepts many entries in one call.
pub trait BatchSink {
    fn write_batch(&mut self, entries: &[LogEntry]) -> Result<(), SinkError>;
}

/// A delivery target bound to one or more channels.
pub trait Sink: Send {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError>;

    /// The batch interface, for sinks that have one.
    fn as_batch(&mut self) -> Option<&mut dyn BatchSink> {
        None
    }
}
