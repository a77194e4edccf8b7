//! Error hierarchy for the Parley SDK.
//!
//! The taxonomy mirrors the engine's degradation policy:
//!
//! - [`TransportError`]: network failures, non-2xx statuses, unparsable
//!   bodies. Inside the engine these are always converted into a `Failure`
//!   log entry and never surfaced to callers of the `send_*` methods.
//! - [`ParleyError::MalformedPayload`]: valid JSON missing the `messages`
//!   list — same conversion.
//! - [`ParleyError::Configuration`]: non-fatal, logged via `tracing::warn!`.
//! - [`ParleyError::Timeout`]: `await_response` gave up waiting.
//!
//! Only the awaited calls (`send_context`, `get_voice_credentials`,
//! `await_response`) return these to the caller.

use thiserror::Error;

/// Convenience result alias for SDK operations.
pub type Result<T> = std::result::Result<T, ParleyError>;

/// Top-level error type for the Parley SDK.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Transport-level failure (network, status, body parse).
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// Inbound payload was valid JSON but did not carry a `messages` list.
    #[error("malformed payload: {detail}")]
    MalformedPayload {
        /// What was wrong with the payload shape.
        detail: String,
    },

    /// Non-fatal configuration problem (stale URL pattern, redundant
    /// language-code set, missing conversation ID).
    #[error("configuration: {message}")]
    Configuration {
        /// Human-readable description.
        message: String,
    },

    /// `await_response` saw no qualifying response within its window.
    #[error("no response arrived within {timeout_ms} ms")]
    Timeout {
        /// The window that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The handler was destroyed; no further operations are possible.
    #[error("conversation handler has been destroyed")]
    Destroyed,
}

impl ParleyError {
    /// Create a malformed-payload error.
    #[must_use]
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedPayload {
            detail: detail.into(),
        }
    }

    /// Create a configuration warning error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Transport-level failure.
///
/// Kept free of client-crate types so the vocabulary crate does not depend
/// on any particular HTTP or socket implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never completed (DNS, TLS, connection reset, ...).
    #[error("network error: {message}")]
    Network {
        /// Underlying error text.
        message: String,
    },

    /// The backend answered with a non-2xx status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// The response body was not parsable as JSON.
    #[error("unparsable response body: {detail}")]
    BadJson {
        /// Parse error text.
        detail: String,
    },

    /// The socket channel rejected or dropped the frame.
    #[error("socket error: {message}")]
    Socket {
        /// Underlying error text.
        message: String,
    },
}

impl TransportError {
    /// Create a network error from any displayable source.
    #[must_use]
    pub fn network(err: impl std::fmt::Display) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }

    /// Create a bad-JSON error from any displayable source.
    #[must_use]
    pub fn bad_json(err: impl std::fmt::Display) -> Self {
        Self::BadJson {
            detail: err.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn transport_error_converts_to_parley_error() {
        let err: ParleyError = TransportError::Status {
            status: 502,
            body: "bad gateway".into(),
        }
        .into();
        assert_matches!(err, ParleyError::Transport(TransportError::Status { status: 502, .. }));
    }

    #[test]
    fn display_messages() {
        let err = ParleyError::Timeout { timeout_ms: 10_000 };
        assert_eq!(err.to_string(), "no response arrived within 10000 ms");

        let err = TransportError::network("connection refused");
        assert_eq!(err.to_string(), "network error: connection refused");
    }

    #[test]
    fn malformed_helper() {
        let err = ParleyError::malformed("messages is not a list");
        assert_eq!(err.to_string(), "malformed payload: messages is not a list");
    }

    #[test]
    fn bad_json_helper() {
        let err = TransportError::bad_json("expected value at line 1");
        assert_matches!(err, TransportError::BadJson { .. });
    }
}
