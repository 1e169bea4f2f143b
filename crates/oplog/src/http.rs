// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Blocking HTTP plumbing shared by the network sinks.

use core::time::Duration;
use reqwest::blocking::{Client, RequestBuilder, Response};
use std::time::Instant;
use tracing::{debug, error};

use crate::config::Config;
use crate::sinks::SinkError;

/// Builds the blocking client shared by every network sink.
///
/// # Arguments
///
/// * `proxy_url` - HTTPS proxy, usually from `OPLOG_PROXY_URL` or `HTTPS_PROXY`
/// * `timeout` - Per-request timeout, applied to each retry attempt separately
///
/// # Returns
///
/// A `reqwest::blocking::Client` ready to be cloned into each sink.
///
/// # Error Handling
///
/// An unparseable proxy is logged and the client is rebuilt without it. If that fails
/// too, reqwest's default client is returned, so this never fails.
///
/// # Example
///
/// ```rust,ignore
/// let client = build_client(config.proxy_url.as_deref(), Duration::from_secs(5));
/// ```
#[must_use]
pub fn build_client(proxy_url: Option<&str>, timeout: Duration) -> Client {
    match build_client_inner(proxy_url, timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to parse proxy configuration: {e}, falling back to direct connection");
            match build_client_inner(None, timeout) {
                Ok(client) => client,
                Err(inner) => {
                    error!("Failed to build HTTP client: {inner}, using reqwest defaults");
                    Client::new()
                }
            }
        }
    }
}

fn build_client_inner(proxy_url: Option<&str>, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

/// How many times a request is sent and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts with no pause.
    Immediate(u32),
    /// Up to `attempts` attempts, sleeping `base_ms * 2^(n-1)` after the n-th failure.
    ExponentialBackoff { attempts: u32, base_ms: u64 },
}

impl RetryStrategy {
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        let attempts = match self {
            RetryStrategy::Immediate(attempts)
            | RetryStrategy::ExponentialBackoff { attempts, .. } => *attempts,
        };
        attempts.max(1)
    }

    /// Pause after the `attempt`-th failure (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::ExponentialBackoff { base_ms, .. } => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
        }
    }
}

impl From<&Config> for RetryStrategy {
    fn from(config: &Config) -> Self {
        RetryStrategy::ExponentialBackoff {
            attempts: config.max_retries,
            base_ms: config.retry_backoff_base_ms,
        }
    }
}

/// Sends `request` until it gets a 2xx, a 4xx, or runs out of attempts.
///
/// The builder is cloned for every attempt, so its body must be in memory.
///
/// # Arguments
///
/// * `label` - Log prefix of the calling sink, e.g. `BULK`
/// * `request` - Fully built request, reused across attempts
/// * `strategy` - Attempt count and pause between attempts
///
/// # Returns
///
/// The first 2xx response. Its body has not been read yet.
///
/// # Errors
///
/// * [`SinkError::Transient`] - connection failures, timeouts and 5xx on every attempt
/// * [`SinkError::ClientRejection`] - any other non-2xx status, returned on the first
///   occurrence with the response body
/// * [`SinkError::InvalidConfig`] - the request body is a stream and cannot be cloned
pub fn send_with_retry(
    label: &str,
    request: &RequestBuilder,
    strategy: RetryStrategy,
) -> Result<Response, SinkError> {
    let max_attempts = strategy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let Some(cloned) = request.try_clone() else {
            return Err(SinkError::InvalidConfig(
                "request body cannot be cloned for retries".to_string(),
            ));
        };

        let time = Instant::now();
        let last_error = match cloned.send() {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                if !status.is_server_error() {
                    let body = response.text().unwrap_or_default();
                    return Err(SinkError::ClientRejection {
                        status: status.as_u16(),
                        body,
                    });
                }
                format!("server responded with {status}")
            }
            Err(e) => e.to_string(),
        };

        if attempts >= max_attempts {
            error!(
                "{label} | Failed to send request after {} ms and {attempts} attempts: {last_error}",
                time.elapsed().as_millis()
            );
            return Err(SinkError::Transient {
                attempts,
                message: last_error,
            });
        }

        let delay = strategy.delay_after(attempts);
        debug!("{label} | Attempt {attempts} failed: {last_error}, retrying in {delay:?}");
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
