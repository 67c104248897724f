/*!
 * Error types for the dispatch engine.
 *
 * This module contains the client-side error taxonomy, using the thiserror
 * crate for ergonomic error definitions. Transient rate-limit responses are
 * absorbed inside the translation client and never appear here unless a
 * caller-supplied retry cap is exhausted.
 */

use thiserror::Error;

/// Errors that can occur when talking to a translation provider
#[derive(Error, Debug)]
pub enum ClientError {
    /// The provider has no usable credentials; never retried
    #[error("no API key configured for provider '{0}'")]
    MissingApiKey(String),

    /// A network-level failure before any HTTP status was received
    #[error("request failed: {0}")]
    Request(String),

    /// The API answered with a non-2xx status that is not a rate-limit signal
    #[error("API responded with error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// The response body was not JSON or carried no translated content
    #[error("failed to parse API response: {0}")]
    Parse(String),

    /// The configured rate-limit retry cap was reached
    #[error("rate limit retries exhausted: {0}")]
    RateLimitExhausted(String),

    /// The operation was cancelled through a [`CancelToken`](crate::cancel::CancelToken)
    #[error("translation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether this error is a configuration problem that no retry or
    /// reassignment can fix for the same provider
    pub fn is_config(&self) -> bool {
        matches!(self, Self::MissingApiKey(_))
    }

    /// Whether this error was caused by cancellation rather than the provider
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
