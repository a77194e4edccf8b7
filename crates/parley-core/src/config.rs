//! Immutable construction-time configuration.
//!
//! [`ChatConfig`] drives transport URL selection, headers, default language,
//! environment, and the experimental flags. It is captured once when the
//! handler is built; later language changes go through the handler, which
//! rebuilds channels with a freshly derived URL.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::DEFAULT_FAILURE_TEXT;
use crate::ids::UserId;

/// How requests reach the backend.
///
/// Decided once at construction from the application URL scheme
/// (`wss://` ⇒ socket, anything else ⇒ HTTP) unless overridden via
/// [`ExperimentalFlags::channel_type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Persistent duplex WebSocket.
    Socket,
    /// Unary HTTP POST per request.
    Http,
}

impl ChannelType {
    /// Sniff the transport mode from a URL scheme.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("wss://") || url.starts_with("ws://") {
            Self::Socket
        } else {
            Self::Http
        }
    }

    /// Wire value carried in the outbound envelope's `channelType` field.
    #[must_use]
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Http => "http",
        }
    }
}

/// Experimental feature flags.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentalFlags {
    /// Force the transport mode instead of sniffing the URL scheme.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<ChannelType>,
    /// Use the application URL verbatim: suppress the `-<languageCode>`
    /// HTTP suffix and the derived WebSocket query parameters.
    pub complete_application_url: bool,
    /// Establish the command channel on its own dedicated connection
    /// (`type=voice-plus`) instead of piggybacking on the primary socket.
    pub bidirectional: bool,
}

/// Immutable configuration for one conversation handler.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    /// Base URL of the conversational application (HTTP or WebSocket).
    pub application_url: String,
    /// Extra headers sent with every HTTP request.
    pub headers: HashMap<String, String>,
    /// Default BCP 47 language code.
    pub language_code: String,
    /// Deployment environment echoed in the outbound envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Known end-user identity, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// API key appended to the bidirectional command-channel URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Dedicated URL for the bidirectional command channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_channel_url: Option<String>,
    /// Channel key embedded in the derived WebSocket URL. Defaults to the
    /// last path segment of the application URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_key: Option<String>,
    /// Open the secondary command channel.
    pub command_channel: bool,
    /// Text used for Failure responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_text: Option<String>,
    /// Experimental flags.
    pub experimental: ExperimentalFlags,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            application_url: String::new(),
            headers: HashMap::new(),
            language_code: "en-US".to_string(),
            environment: None,
            user_id: None,
            api_key: None,
            command_channel_url: None,
            channel_key: None,
            command_channel: false,
            failure_text: None,
            experimental: ExperimentalFlags::default(),
        }
    }
}

impl ChatConfig {
    /// Create a config for the given application URL, warning (non-fatal)
    /// about stale URL patterns.
    #[must_use]
    pub fn new(application_url: impl Into<String>) -> Self {
        let application_url = application_url.into();
        if !application_url.starts_with("https://") && !application_url.starts_with("wss://") {
            warn!(url = %application_url, "application URL does not use https:// or wss://");
        }
        Self {
            application_url,
            ..Self::default()
        }
    }

    /// Effective transport mode: experimental override, else URL sniffing.
    #[must_use]
    pub fn channel_type(&self) -> ChannelType {
        self.experimental
            .channel_type
            .unwrap_or_else(|| ChannelType::from_url(&self.application_url))
    }

    /// Channel key for derived WebSocket URLs: the configured value, else
    /// the last path segment of the application URL.
    #[must_use]
    pub fn channel_key(&self) -> String {
        if let Some(key) = &self.channel_key {
            return key.clone();
        }
        self.application_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Failure text, falling back to the package default.
    #[must_use]
    pub fn failure_text(&self) -> &str {
        self.failure_text.as_deref().unwrap_or(DEFAULT_FAILURE_TEXT)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
