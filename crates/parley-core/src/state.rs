//! The authoritative conversation snapshot.

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, UserId};
use crate::response::Response;

/// The single authoritative snapshot of a conversation.
///
/// Invariants: `conversation_id` is always defined after construction; the
/// response log order equals arrival order; the only in-place mutation is
/// the choice-selection patch on an application message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    /// Ordered, append-mostly response log.
    pub responses: Vec<Response>,
    /// Conversation identifier.
    pub conversation_id: ConversationId,
    /// Active language code.
    pub language_code: String,
    /// End-user identity, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl ConversationState {
    /// Fresh state with an empty log and a new conversation ID.
    #[must_use]
    pub fn new(language_code: impl Into<String>, user_id: Option<UserId>) -> Self {
        Self {
            responses: Vec::new(),
            conversation_id: ConversationId::new(),
            language_code: language_code.into(),
            user_id,
        }
    }
}

/// Prior-session material for resuming a conversation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationSeed {
    /// Log carried over from the previous session.
    pub responses: Vec<Response>,
    /// Conversation ID to continue under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}
