// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::sinks::OnError;

const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 1_000;
const DEFAULT_MAX_BUFFERED_ENTRIES: usize = 100;
const DEFAULT_MAX_BINDINGS_SIZE_BYTES: usize = 2_048;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_BASE_MS: u64 = 100;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RETENTION_DAYS: u32 = 14;
const DEFAULT_INDEX: &str = "logs";
const DEFAULT_TOPIC: &str = "logs";
const DEFAULT_FILE_SINK_NAME: &str = "oplog";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    /// Base URL of the search cluster; `/_bulk` is appended.
    pub url: String,
    /// Index used when an entry does not name one.
    pub default_index: String,
    /// Sent as `Authorization: ApiKey <key>` when set.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Base URL of the REST proxy; `/topics/{topic}` is appended.
    pub url: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// Used to name the retention marker, `.{name}-last-prune`.
    pub name: String,
    /// Files older than this many days are pruned; 0 keeps everything.
    pub retention_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub slow_query_threshold_ms: u64,
    /// Case-insensitive substrings; matching read queries are never logged.
    pub ignore_patterns: Vec<String>,
    pub log_read_queries: bool,
    /// Auto-flush threshold for the deferred buffer; 0 disables auto-flush.
    pub max_buffered_entries: usize,
    pub warn_on_limit: bool,
    /// Cap on the serialized bindings stored with a query; 0 disables the cap.
    pub max_bindings_size_bytes: usize,
    pub on_error: OnError,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub http_timeout_secs: u64,
    pub proxy_url: Option<String>,
    pub search: Option<SearchConfig>,
    pub broker: Option<BrokerConfig>,
    pub file: Option<FileConfig>,
    pub database_channel: String,
    pub http_channel: String,
    pub job_channel: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            slow_query_threshold_ms: DEFAULT_SLOW_QUERY_THRESHOLD_MS,
            ignore_patterns: Vec::new(),
            log_read_queries: false,
            max_buffered_entries: DEFAULT_MAX_BUFFERED_ENTRIES,
            warn_on_limit: true,
            max_bindings_size_bytes: DEFAULT_MAX_BINDINGS_SIZE_BYTES,
            on_error: OnError::Swallow,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_base_ms: DEFAULT_RETRY_BACKOFF_BASE_MS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            proxy_url: None,
            search: None,
            broker: None,
            file: None,
            database_channel: "database".to_string(),
            http_channel: "http".to_string(),
            job_channel: "jobs".to_string(),
        }
    }
}

impl Config {
    /// Builds the configuration from `OPLOG_*` environment variables, falling back to
    /// defaults for anything unset. A sink is enabled by setting its URL or directory.
    pub fn from_env() -> Result<Config, ConfigError> {
        let defaults = Config::default();

        let search = non_empty("OPLOG_SEARCH_URL").map(|url| SearchConfig {
            url,
            default_index: non_empty("OPLOG_SEARCH_INDEX")
                .unwrap_or_else(|| DEFAULT_INDEX.to_string()),
            api_key: non_empty("OPLOG_SEARCH_API_KEY"),
        });

        let broker = non_empty("OPLOG_BROKER_URL").map(|url| BrokerConfig {
            url,
            topic: non_empty("OPLOG_BROKER_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
        });

        let file = match non_empty("OPLOG_FILE_DIR") {
            Some(directory) => Some(FileConfig {
                directory: PathBuf::from(directory),
                name: non_empty("OPLOG_FILE_NAME")
                    .unwrap_or_else(|| DEFAULT_FILE_SINK_NAME.to_string()),
                retention_days: parsed("OPLOG_RETENTION_DAYS")?.unwrap_or(DEFAULT_RETENTION_DAYS),
            }),
            None => None,
        };

        let on_error = match boolean("OPLOG_SILENT")? {
            Some(false) => OnError::Propagate,
            Some(true) | None => OnError::Swallow,
        };

        Ok(Config {
            slow_query_threshold_ms: parsed("OPLOG_SLOW_QUERY_THRESHOLD_MS")?
                .unwrap_or(defaults.slow_query_threshold_ms),
            ignore_patterns: non_empty("OPLOG_IGNORE_PATTERNS")
                .map(|patterns| parse_list(&patterns))
                .unwrap_or_default(),
            log_read_queries: boolean("OPLOG_LOG_READ_QUERIES")?
                .unwrap_or(defaults.log_read_queries),
            max_buffered_entries: parsed("OPLOG_MAX_BUFFERED_ENTRIES")?
                .unwrap_or(defaults.max_buffered_entries),
            warn_on_limit: boolean("OPLOG_WARN_ON_LIMIT")?.unwrap_or(defaults.warn_on_limit),
            max_bindings_size_bytes: parsed("OPLOG_MAX_BINDINGS_SIZE_BYTES")?
                .unwrap_or(defaults.max_bindings_size_bytes),
            on_error,
            max_retries: parsed("OPLOG_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_backoff_base_ms: parsed("OPLOG_RETRY_BACKOFF_MS")?
                .unwrap_or(defaults.retry_backoff_base_ms),
            http_timeout_secs: parsed("OPLOG_HTTP_TIMEOUT_SECS")?
                .unwrap_or(defaults.http_timeout_secs),
            proxy_url: non_empty("OPLOG_PROXY_HTTPS").or_else(|| non_empty("HTTPS_PROXY")),
            search,
            broker,
            file,
            database_channel: non_empty("OPLOG_DATABASE_CHANNEL")
                .unwrap_or(defaults.database_channel),
            http_channel: non_empty("OPLOG_HTTP_CHANNEL").unwrap_or(defaults.http_channel),
            job_channel: non_empty("OPLOG_JOB_CHANNEL").unwrap_or(defaults.job_channel),
        })
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match non_empty(var) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(None),
    }
}

fn boolean(var: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(value) = non_empty(var) else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::Invalid { var, value }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .map(ToString::to_string)
        .collect()
}
