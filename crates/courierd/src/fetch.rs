//! Bounded, blocking URL fetch.
//!
//! The fetch deliberately blocks the event loop: the timeout is the only
//! bound, covering connect through body completion, so loop responsiveness
//! degrades by at most that bound per in-flight call. Transport failures and
//! timeouts are not distinguished; callers see one generic failure either
//! way.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced while fetching a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Building the HTTP client failed.
    #[error("failed to build fetch client: {0}")]
    Client(#[source] reqwest::Error),
    /// The transfer failed or exceeded the timeout.
    #[error("transfer failed: {0}")]
    Transfer(#[from] reqwest::Error),
}

/// Performs bounded HTTP GET fetches.
///
/// One client is shared across requests; each fetch inherits the configured
/// total-request timeout.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::blocking::Client,
}

impl Fetcher {
    /// Builds a fetcher whose requests are bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] when the underlying client cannot be
    /// constructed.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }

    /// Fetches `url`, returning the response body.
    ///
    /// The body is returned for any HTTP status; only transport-level
    /// failures (unreachable host, timeout, truncated transfer) produce an
    /// error. Nothing is retained from a failed transfer.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transfer`] for any transport failure, including
    /// timeouts.
    pub fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send()?;
        let body = response.bytes()?;
        Ok(body.to_vec())
    }
}
