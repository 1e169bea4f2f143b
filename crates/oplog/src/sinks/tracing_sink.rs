// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tracing::{debug, error, info, warn};

use crate::entry::{Level, LogEntry};
use crate::sinks::{Sink, SinkError};

/// Re-emits entries as `tracing` events.
///
/// The dispatcher uses it as the last-resort writer when a channel cannot be resolved, so
/// an entry still reaches whatever subscriber the host installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn name(&self) -> &str {
        "TRACING"
    }

    fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        let context = serde_json::to_string(entry.fields())?;
        let context = context.as_str();
        let channel = entry.channel();
        let message = entry.message();
        match entry.level() {
            Level::Debug => debug!(channel, context, "{message}"),
            Level::Info | Level::Notice => info!(channel, context, "{message}"),
            Level::Warning => warn!(channel, context, "{message}"),
            Level::Error | Level::Critical | Level::Alert | Level::Emergency => {
                error!(channel, context, "{message}");
            }
        }
        Ok(())
    }
}
