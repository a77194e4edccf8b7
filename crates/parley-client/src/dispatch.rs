//! Outbound request dispatch: envelope construction and the HTTP leg.
//!
//! Every outbound request, socket or HTTP, is wrapped in the same envelope:
//! session fields (`userId`, `conversationId`) first, then the caller body,
//! then the authoritative fields (`languageCode`, `channelType`,
//! `environment`) which always win. Merging is shallow at the top level.
//!
//! The HTTP leg lives here; the socket leg is just envelope-to-string and
//! belongs to the channel. The transport-override hook replaces both.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use parley_core::constants::{SDK_VERSION_HEADER, VERSION};
use parley_core::errors::TransportError;
use parley_core::{ChannelType, ChatConfig, Response};

use crate::state::StateStore;

/// Callback handed to a transport override for feeding responses back into
/// the log.
pub type AppendResponse = Arc<dyn Fn(Response) + Send + Sync>;

/// Transport-override hook: receives the fully built envelope and an append
/// callback, and takes over delivery entirely.
pub type RequestOverride = Arc<dyn Fn(Value, AppendResponse) + Send + Sync>;

/// Credentials for an external voice/audio provider.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCredentials {
    /// Short-lived provider token.
    pub token: String,
    /// Token lifetime in seconds, if the provider reports one.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Provider region, if the provider reports one.
    #[serde(default)]
    pub region: Option<String>,
}

/// Builder of envelopes and owner of the HTTP client.
pub struct RequestDispatcher {
    config: Arc<ChatConfig>,
    http: reqwest::Client,
}

impl RequestDispatcher {
    /// Build a dispatcher around a shared config.
    #[must_use]
    pub fn new(config: Arc<ChatConfig>) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &config.headers {
            let Ok(name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(header = %name, "invalid header name ignored");
                continue;
            };
            let Ok(value) = reqwest::header::HeaderValue::from_str(value) else {
                tracing::warn!(header = %name, "invalid header value ignored");
                continue;
            };
            let _ = headers.insert(name, value);
        }
        let _ = headers.insert(
            ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let _ = headers.insert(
            SDK_VERSION_HEADER,
            reqwest::header::HeaderValue::from_static(VERSION),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Build the outbound envelope around a caller body.
    ///
    /// Merge order (shallow, top level): session fields, then the body,
    /// then the authoritative trailer fields which always win.
    #[must_use]
    pub fn build_envelope(&self, store: &StateStore, body: Value) -> Value {
        let mut envelope = Map::new();
        if let Some(user_id) = store.user_id() {
            let _ = envelope.insert("userId".into(), json!(user_id));
        }
        let _ = envelope.insert("conversationId".into(), json!(store.conversation_id()));

        if let Value::Object(body) = body {
            for (key, value) in body {
                let _ = envelope.insert(key, value);
            }
        }

        let _ = envelope.insert("languageCode".into(), json!(store.language_code()));
        let _ = envelope.insert(
            "channelType".into(),
            json!(self.config.channel_type().as_wire_str()),
        );
        if let Some(environment) = &self.config.environment {
            let _ = envelope.insert("environment".into(), json!(environment));
        }
        Value::Object(envelope)
    }

    /// HTTP base of the application URL, with WebSocket schemes mapped to
    /// their HTTP counterparts.
    #[must_use]
    pub fn http_base(&self) -> String {
        let url = &self.config.application_url;
        if let Some(rest) = url.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = url.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            url.clone()
        }
    }

    /// POST target for conversation turns: the HTTP base suffixed with
    /// `-<languageCode>`, unless `completeApplicationUrl` is set.
    #[must_use]
    pub fn http_url(&self, language_code: &str) -> String {
        let base = self.http_base();
        if self.config.experimental.complete_application_url {
            return base;
        }
        format!("{base}-{language_code}")
    }

    /// POST an envelope and parse the JSON body.
    pub async fn post(&self, url: &str, envelope: &Value) -> Result<Value, TransportError> {
        debug!(url, "dispatching HTTP request");
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(envelope)
            .send()
            .await
            .map_err(TransportError::network)?;

        let status = response.status();
        let body = response.text().await.map_err(TransportError::network)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(TransportError::bad_json)
    }

    /// GET a URL and parse the JSON body.
    pub async fn get(&self, url: &str) -> Result<Value, TransportError> {
        debug!(url, "dispatching HTTP GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(TransportError::network)?;

        let status = response.status();
        let body = response.text().await.map_err(TransportError::network)?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(TransportError::bad_json)
    }

    /// Fetch voice-provider credentials from the HTTP base.
    pub async fn voice_credentials(&self) -> Result<VoiceCredentials, TransportError> {
        let url = format!("{}/voice/credentials", self.http_base());
        let body = self.get(&url).await?;
        serde_json::from_value(body).map_err(TransportError::bad_json)
    }

    /// Effective transport mode.
    #[must_use]
    pub fn channel_type(&self) -> ChannelType {
        self.config.channel_type()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
