use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::util::{backoff, retriable_status};

/// Bounded exponential backoff applied to transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and tight loops.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// One HTTP connection pool plus the retry policy shared by every component
/// built from it.
#[derive(Debug, Clone)]
pub struct HttpSession {
    http: HttpClient,
    retry: RetryPolicy,
}

impl HttpSession {
    pub fn new(timeout: Duration, verify: bool) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("earthdata-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("earthdata-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(timeout);

        if !verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(Error::HttpClient)?;
        Ok(Self {
            http,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sends a request, retrying connection errors and retriable statuses.
    ///
    /// When every attempt came back with a retriable status the last response
    /// is returned so the caller can report the service's own error body.
    pub(crate) fn robust_request<F>(&self, url: &str, mut f: F) -> Result<Response>
    where
        F: FnMut(&HttpClient) -> std::result::Result<Response, reqwest::Error>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut sleep = self.retry.initial_delay;
        let mut tries = 0usize;
        loop {
            tries += 1;
            match f(&self.http) {
                Ok(resp) => {
                    let status = resp.status();
                    if retriable_status(status.as_u16()) && tries < max_attempts {
                        warn!(url, status = status.as_u16(), attempt = tries, "retriable status");
                        thread::sleep(sleep);
                        sleep = backoff(sleep, self.retry.max_delay);
                        continue;
                    }
                    debug!(url, status = status.as_u16(), "response");
                    return Ok(resp);
                }
                Err(err) => {
                    if tries >= max_attempts {
                        return Err(Error::Transport {
                            url: url.to_string(),
                            attempts: tries,
                            message: err.to_string(),
                        });
                    }
                    warn!(url, attempt = tries, error = %err, "request failed, retrying");
                    thread::sleep(sleep);
                    sleep = backoff(sleep, self.retry.max_delay);
                }
            }
        }
    }
}

/// Reads a response body, returning the status alongside the text.
pub(crate) fn read_text(url: &str, resp: Response) -> Result<(reqwest::StatusCode, String)> {
    let status = resp.status();
    let text = resp.text().map_err(|e| Error::Transport {
        url: url.to_string(),
        attempts: 1,
        message: format!("failed to read body: {e}"),
    })?;
    Ok((status, text))
}

pub(crate) fn parse_json<T: DeserializeOwned>(url: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|source| Error::Json {
        url: url.to_string(),
        source,
    })
}
