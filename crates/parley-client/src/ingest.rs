//! Response ingestion: raw backend JSON into log entries.
//!
//! All inbound data, whether an HTTP response body or a socket frame, goes
//! through [`ResponseIngestor`]. Valid payloads append an `Application`
//! entry; anything malformed appends a single `Failure` entry carrying the
//! configured failure text. If the payload flags `hasPendingDataRequest`,
//! a synthetic polling turn is appended synchronously and the caller is
//! told to schedule the delayed re-poll.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use parley_core::{InboundPayload, ParleyError, Response};

use crate::state::StateStore;

/// What the caller must do after an ingest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The payload flagged a pending data request; dispatch a delayed poll.
    pub needs_poll: bool,
}

/// Validator and log writer for inbound payloads.
pub struct ResponseIngestor {
    store: Arc<StateStore>,
    failure_text: String,
}

impl ResponseIngestor {
    /// Build an ingestor writing into the given store.
    #[must_use]
    pub fn new(store: Arc<StateStore>, failure_text: impl Into<String>) -> Self {
        Self {
            store,
            failure_text: failure_text.into(),
        }
    }

    /// Ingest an already-parsed JSON payload.
    ///
    /// One payload maps to exactly one log entry: an `Application` entry on
    /// success, a `Failure` entry otherwise. A pending data request appends
    /// the synthetic polling turn as a second, separate notification.
    pub fn ingest_value(&self, payload: Value) -> IngestOutcome {
        let inbound: InboundPayload = match serde_json::from_value(payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "inbound payload failed to deserialize");
                self.fail();
                return IngestOutcome::default();
            }
        };
        match inbound.into_application() {
            Ok(application) => {
                let needs_poll = application.has_pending_data_request();
                debug!(
                    messages = application.messages.len(),
                    needs_poll, "ingested application response"
                );
                self.store.append(Response::application(application));
                if needs_poll {
                    self.store.append(Response::poll());
                }
                IngestOutcome { needs_poll }
            }
            Err(ParleyError::MalformedPayload { detail }) => {
                warn!(detail, "inbound payload is malformed");
                self.fail();
                IngestOutcome::default()
            }
            Err(e) => {
                warn!(error = %e, "inbound payload rejected");
                self.fail();
                IngestOutcome::default()
            }
        }
    }

    /// Ingest a raw text frame. Unparsable JSON degrades to a `Failure`
    /// entry like any other malformed payload.
    pub fn ingest_text(&self, text: &str) -> IngestOutcome {
        match serde_json::from_str::<Value>(text) {
            Ok(payload) => self.ingest_value(payload),
            Err(e) => {
                warn!(error = %e, "inbound frame is not valid JSON");
                self.fail();
                IngestOutcome::default()
            }
        }
    }

    /// Append a `Failure` entry with the configured failure text.
    pub fn fail(&self) {
        self.store.append(Response::failure(&self.failure_text));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
