//! The conversation response model.
//!
//! A conversation log is an ordered list of [`Response`] values. Each entry
//! is tagged by source — the application, the end user, or a synthesized
//! failure — and carries a wall-clock receipt timestamp in epoch
//! milliseconds.
//!
//! [`InboundPayload`] is the ingestion boundary: raw backend JSON is
//! validated here into the typed model, and anything without a `messages`
//! list maps to the Failure variant instead of propagating untyped data.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ParleyError;
use crate::request::StructuredRequest;

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ─────────────────────────────────────────────────────────────────────────────
// Response — the log entry
// ─────────────────────────────────────────────────────────────────────────────

/// One entry in the conversation log (discriminated by `source`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum Response {
    /// A reply from the conversational application.
    Application {
        /// Receipt timestamp, epoch milliseconds.
        #[serde(rename = "receivedAt")]
        received_at: i64,
        /// Typed payload.
        payload: ApplicationPayload,
    },
    /// A turn produced locally on behalf of the end user.
    User {
        /// Receipt timestamp, epoch milliseconds.
        #[serde(rename = "receivedAt")]
        received_at: i64,
        /// Typed payload.
        payload: UserPayload,
    },
    /// A degraded transport or payload failure, rendered like any message.
    Failure {
        /// Receipt timestamp, epoch milliseconds.
        #[serde(rename = "receivedAt")]
        received_at: i64,
        /// Display text.
        text: String,
    },
}

impl Response {
    /// Application response stamped with the current time.
    #[must_use]
    pub fn application(payload: ApplicationPayload) -> Self {
        Self::Application {
            received_at: now_ms(),
            payload,
        }
    }

    /// User free-text turn.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::User {
            received_at: now_ms(),
            payload: UserPayload::Text { text: text.into() },
        }
    }

    /// User choice-click turn.
    #[must_use]
    pub fn user_choice(choice_id: impl Into<String>) -> Self {
        Self::User {
            received_at: now_ms(),
            payload: UserPayload::Choice {
                choice_id: choice_id.into(),
            },
        }
    }

    /// User structured turn.
    #[must_use]
    pub fn user_structured(request: StructuredRequest) -> Self {
        Self::User {
            received_at: now_ms(),
            payload: UserPayload::Structured {
                request,
                context: None,
            },
        }
    }

    /// User structured turn with a context echo.
    #[must_use]
    pub fn user_structured_with_context(request: StructuredRequest, context: Value) -> Self {
        Self::User {
            received_at: now_ms(),
            payload: UserPayload::Structured {
                request,
                context: Some(context),
            },
        }
    }

    /// Synthetic internal polling turn (`{structured: {poll: true}}`).
    #[must_use]
    pub fn poll() -> Self {
        Self::user_structured(StructuredRequest::poll())
    }

    /// Failure entry stamped with the current time.
    #[must_use]
    pub fn failure(text: impl Into<String>) -> Self {
        Self::Failure {
            received_at: now_ms(),
            text: text.into(),
        }
    }

    /// Returns `true` for Application entries.
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application { .. })
    }

    /// Returns `true` for User entries.
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    /// Returns `true` for Failure entries.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Receipt timestamp in epoch milliseconds.
    #[must_use]
    pub fn received_at(&self) -> i64 {
        match self {
            Self::Application { received_at, .. }
            | Self::User { received_at, .. }
            | Self::Failure { received_at, .. } => *received_at,
        }
    }

    /// Application payload, if this is an Application entry.
    #[must_use]
    pub fn as_application(&self) -> Option<&ApplicationPayload> {
        match self {
            Self::Application { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Mutable application payload — the choice patch goes through here.
    pub fn as_application_mut(&mut self) -> Option<&mut ApplicationPayload> {
        match self {
            Self::Application { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// User payload, if this is a User entry.
    #[must_use]
    pub fn as_user(&self) -> Option<&UserPayload> {
        match self {
            Self::User { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application payload
// ─────────────────────────────────────────────────────────────────────────────

/// A selectable choice attached to an application message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    /// Stable choice identifier.
    pub choice_id: String,
    /// Display text.
    #[serde(default)]
    pub choice_text: String,
    /// Opaque payload attached by the flow author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_payload: Option<Value>,
}

/// One message within an application response.
///
/// `selected_choice_id` is the only field in the entire log that is mutated
/// in place rather than appended.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationMessage {
    /// Message text.
    #[serde(default)]
    pub text: String,
    /// Flow node that produced the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Stable message identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Choices presented with the message (normalized to `[]` on ingest).
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// The choice the user picked, patched in after a choice click.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_choice_id: Option<String>,
}

impl ApplicationMessage {
    /// Whether the message presents a choice with the given ID.
    #[must_use]
    pub fn has_choice(&self, choice_id: &str) -> bool {
        self.choices.iter().any(|c| c.choice_id == choice_id)
    }
}

/// Metadata block attached to an application response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseMetadata {
    /// Backend intent that produced the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    /// The backend wants a human takeover.
    pub escalation: bool,
    /// Frustration detected in the user's input.
    pub frustration: bool,
    /// The backend did not understand the input.
    pub incomprehension: bool,
    /// More turns are required before a final answer; triggers polling.
    pub has_pending_data_request: bool,
    /// Presigned upload URLs offered to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_urls: Option<Vec<String>>,
    /// Knowledge-base sources backing the answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Value>,
}

/// Typed payload of an application response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationPayload {
    /// Normalized message list.
    pub messages: Vec<ApplicationMessage>,
    /// Metadata block, if sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
    /// Expiration of the response content, epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_timestamp: Option<i64>,
    /// Conversation ID echoed by the server (informational; id rotation
    /// happens only through `reset()`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Raw payload string passed through from the flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Modality map for alternate renderings (e.g. voice).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Map<String, Value>>,
    /// Context echo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ApplicationPayload {
    /// Whether the backend flagged a pending data request.
    #[must_use]
    pub fn has_pending_data_request(&self) -> bool {
        self.metadata
            .as_ref()
            .is_some_and(|m| m.has_pending_data_request)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User payload
// ─────────────────────────────────────────────────────────────────────────────

/// Typed payload of a user turn (discriminated by `type`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum UserPayload {
    /// Free-text input.
    Text {
        /// The text as typed.
        text: String,
    },
    /// A choice click.
    Choice {
        /// The selected choice ID.
        choice_id: String,
    },
    /// A structured (machine-field) request.
    Structured {
        /// The structured request.
        request: StructuredRequest,
        /// Optional context echo sent alongside.
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
}

impl UserPayload {
    /// Whether this is a synthetic internal polling turn.
    #[must_use]
    pub fn is_poll(&self) -> bool {
        matches!(self, Self::Structured { request, .. } if request.poll)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion boundary
// ─────────────────────────────────────────────────────────────────────────────

/// Lenient mirror of the raw backend payload.
///
/// `messages` stays untyped here so "missing" and "not a list" can be told
/// apart from ordinary deserialization errors; [`InboundPayload::into_application`]
/// performs the actual validation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboundPayload {
    /// Raw `messages` field, validated as a list during conversion.
    pub messages: Option<Value>,
    /// Metadata block.
    pub metadata: Option<ResponseMetadata>,
    /// Expiration timestamp, epoch milliseconds.
    pub expiration_timestamp: Option<i64>,
    /// Server-side conversation ID echo.
    pub conversation_id: Option<String>,
    /// Raw payload string.
    pub payload: Option<String>,
    /// Modality map.
    pub modalities: Option<Map<String, Value>>,
    /// Context echo.
    pub context: Option<Value>,
}

impl InboundPayload {
    /// Validate and normalize into a typed [`ApplicationPayload`].
    ///
    /// A missing or non-list `messages` field is rejected, as is any message
    /// entry with an invalid shape. Choices default to an empty list.
    pub fn into_application(self) -> Result<ApplicationPayload, ParleyError> {
        let messages = match self.messages {
            Some(Value::Array(entries)) => entries
                .into_iter()
                .map(|entry| {
                    serde_json::from_value::<ApplicationMessage>(entry)
                        .map_err(|e| ParleyError::malformed(format!("invalid message entry: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(ParleyError::malformed("messages is not a list")),
            None => return Err(ParleyError::malformed("messages is missing")),
        };

        Ok(ApplicationPayload {
            messages,
            metadata: self.metadata,
            expiration_timestamp: self.expiration_timestamp,
            conversation_id: self.conversation_id,
            payload: self.payload,
            modalities: self.modalities,
            context: self.context,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    // ── Response constructors ────────────────────────────────────────

    #[test]
    fn user_text_shape() {
        let entry = Response::user_text("hi");
        assert!(entry.is_user());
        assert!(entry.received_at() > 0);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["source"], "user");
        assert_eq!(json["payload"]["type"], "text");
        assert_eq!(json["payload"]["text"], "hi");
        assert!(json.get("receivedAt").is_some());
    }

    #[test]
    fn user_choice_uses_camel_case_field() {
        let entry = Response::user_choice("c1");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["payload"]["type"], "choice");
        assert_eq!(json["payload"]["choiceId"], "c1");
    }

    #[test]
    fn poll_entry_is_internal_structured() {
        let entry = Response::poll();
        assert_matches!(entry.as_user(), Some(p) if p.is_poll());
    }

    #[test]
    fn failure_entry() {
        let entry = Response::failure("broken");
        assert!(entry.is_failure());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["source"], "failure");
        assert_eq!(json["text"], "broken");
    }

    #[test]
    fn response_serde_roundtrip() {
        let entry = Response::application(ApplicationPayload {
            messages: vec![ApplicationMessage {
                text: "hello".into(),
                ..ApplicationMessage::default()
            }],
            ..ApplicationPayload::default()
        });
        let json = serde_json::to_string(&entry).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }

    // ── ApplicationMessage ───────────────────────────────────────────

    #[test]
    fn has_choice_matches_by_id() {
        let msg = ApplicationMessage {
            choices: vec![Choice {
                choice_id: "c1".into(),
                ..Choice::default()
            }],
            ..ApplicationMessage::default()
        };
        assert!(msg.has_choice("c1"));
        assert!(!msg.has_choice("c2"));
    }

    // ── InboundPayload validation ────────────────────────────────────

    #[test]
    fn inbound_empty_object_is_malformed() {
        let inbound: InboundPayload = serde_json::from_value(json!({})).unwrap();
        let err = inbound.into_application().unwrap_err();
        assert_matches!(err, ParleyError::MalformedPayload { .. });
    }

    #[test]
    fn inbound_non_list_messages_is_malformed() {
        let inbound: InboundPayload =
            serde_json::from_value(json!({ "messages": "oops" })).unwrap();
        assert_matches!(
            inbound.into_application(),
            Err(ParleyError::MalformedPayload { .. })
        );
    }

    #[test]
    fn inbound_normalizes_missing_choices() {
        let inbound: InboundPayload =
            serde_json::from_value(json!({ "messages": [{ "text": "hello" }] })).unwrap();
        let payload = inbound.into_application().unwrap();
        assert_eq!(payload.messages.len(), 1);
        assert_eq!(payload.messages[0].text, "hello");
        assert!(payload.messages[0].choices.is_empty());
    }

    #[test]
    fn inbound_invalid_message_entry_is_malformed() {
        let inbound: InboundPayload =
            serde_json::from_value(json!({ "messages": [{ "text": 42 }] })).unwrap();
        assert_matches!(
            inbound.into_application(),
            Err(ParleyError::MalformedPayload { .. })
        );
    }

    #[test]
    fn inbound_carries_metadata_flags() {
        let inbound: InboundPayload = serde_json::from_value(json!({
            "messages": [],
            "metadata": { "hasPendingDataRequest": true, "escalation": true }
        }))
        .unwrap();
        let payload = inbound.into_application().unwrap();
        assert!(payload.has_pending_data_request());
        assert!(payload.metadata.as_ref().unwrap().escalation);
        assert!(!payload.metadata.as_ref().unwrap().frustration);
    }

    #[test]
    fn inbound_preserves_extras() {
        let inbound: InboundPayload = serde_json::from_value(json!({
            "messages": [{ "text": "x", "choices": [{ "choiceId": "c1", "choiceText": "One" }] }],
            "conversationId": "conv-9",
            "payload": "raw-string",
            "context": { "k": "v" }
        }))
        .unwrap();
        let payload = inbound.into_application().unwrap();
        assert_eq!(payload.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(payload.payload.as_deref(), Some("raw-string"));
        assert_eq!(payload.context, Some(json!({ "k": "v" })));
        assert_eq!(payload.messages[0].choices[0].choice_text, "One");
    }
}
