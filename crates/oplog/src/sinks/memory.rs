// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};

use crate::entry::LogEntry;
use crate::sinks::{BatchSink, Sink, SinkError};

/// Records what it receives; shared handles let a test inspect it after the registry has
/// taken ownership.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemorySink {
    pub entries: Arc<Mutex<Vec<LogEntry>>>,
    pub batch_sizes: Arc<Mutex<Vec<usize>>>,
    pub batch_capable: bool,
    pub fail_batches: bool,
    pub fail_writes: bool,
    /// Rejects single writes of entries carrying this message.
    pub reject_message: Option<String>,
}

impl MemorySink {
    pub fn batching() -> Self {
        MemorySink {
            batch_capable: true,
            ..MemorySink::default()
        }
    }

    pub fn received(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.received()
            .iter()
            .map(|entry| entry.message().to_string())
            .collect()
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }
}

impl BatchSink for MemorySink {
    fn write_batch(&mut self, entries: &[LogEntry]) -> Result<(), SinkError> {
        if self.fail_batches {
            return Err(SinkError::Transient {
                attempts: 1,
                message: "batch refused".to_string(),
            });
        }
        self.batch_sizes.lock().unwrap().push(entries.len());
        self.entries.lock().unwrap().extend_from_slice(entries);
        Ok(())
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "MEMORY"
    }

    fn write(&mut self, entry: &LogEntry) -> Result<(), SinkError> {
        if self.fail_writes || self.reject_message.as_deref() == Some(entry.message()) {
            return Err(SinkError::ClientRejection {
                status: 400,
                body: "write refused".to_string(),
            });
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn as_batch(&mut self) -> Option<&mut dyn BatchSink> {
        if self.batch_capable {
            Some(self)
        } else {
            None
        }
    }
}
