// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use oplog::clock::system_clock;
use oplog::config::Config;
use oplog::event::{JobEvent, ModelEvent, QueryEvent, RequestEvent};
use oplog::recorder::Recorder;

/// One line of replay input.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ReplayEvent {
    Query(QueryEvent),
    Model(ModelEvent),
    Request(RequestEvent),
    Job(JobEvent),
    /// Sets the nesting level reported for a connection until the next change.
    Transaction { connection: String, level: u32 },
    /// End of a request or job.
    Boundary,
}

/// Nesting levels announced by `transaction` lines, read back by the tracker.
#[derive(Debug, Clone, Default)]
struct TransactionLevels(Arc<Mutex<HashMap<String, u32>>>);

impl TransactionLevels {
    fn set(&self, connection: String, level: u32) -> anyhow::Result<()> {
        let mut levels = self
            .0
            .lock()
            .map_err(|_| anyhow!("transaction levels lock poisoned"))?;
        levels.insert(connection, level);
        Ok(())
    }

    fn level(&self, connection: &str) -> anyhow::Result<u32> {
        let levels = self
            .0
            .lock()
            .map_err(|_| anyhow!("transaction levels lock poisoned"))?;
        Ok(levels.get(connection).copied().unwrap_or(0))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ReplayStats {
    events: usize,
    skipped: usize,
    boundaries: usize,
    delivered: usize,
}

fn replay(
    input: impl BufRead,
    recorder: &mut Recorder,
    levels: &TransactionLevels,
) -> anyhow::Result<ReplayStats> {
    let mut stats = ReplayStats::default();

    for (number, line) in input.lines().enumerate() {
        let line = line.context("failed to read replay input")?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ReplayEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!("REPLAY | Skipping line {}: {e}", number + 1);
                stats.skipped += 1;
                continue;
            }
        };

        stats.events += 1;
        match event {
            ReplayEvent::Query(event) => recorder.record_query(&event),
            ReplayEvent::Model(event) => recorder.record_model_event(&event),
            ReplayEvent::Request(event) => recorder.record_request(&event),
            ReplayEvent::Job(event) => recorder.record_job(&event),
            ReplayEvent::Transaction { connection, level } => levels.set(connection, level)?,
            ReplayEvent::Boundary => {
                stats.boundaries += 1;
                stats.delivered += recorder.end_request().entries;
            }
        }
    }

    stats.delivered += recorder.end_request().entries;
    Ok(stats)
}

fn main() -> anyhow::Result<()> {
    let log_level = env::var("OPLOG_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    let config = Config::from_env().context("invalid OPLOG_* configuration")?;
    let levels = TransactionLevels::default();
    let source_levels = levels.clone();
    let mut recorder = Recorder::from_config(
        &config,
        Box::new(move |connection: &str| source_levels.level(connection)),
        system_clock(),
    );

    let stats = match env::args().nth(1) {
        Some(path) => {
            let file = File::open(&path).with_context(|| format!("failed to open {path}"))?;
            replay(BufReader::new(file), &mut recorder, &levels)?
        }
        None => replay(io::stdin().lock(), &mut recorder, &levels)?,
    };

    info!(
        "REPLAY | Replayed {} events ({} skipped) across {} boundaries, {} entries flushed",
        stats.events, stats.skipped, stats.boundaries, stats.delivered
    );
    Ok(())
}
