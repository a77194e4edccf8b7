//! The secondary command channel.
//!
//! Commands are backend-to-frontend control frames (and, in bidirectional
//! mode, frontend-to-backend ones) that never enter the conversation log.
//! Two wire modes exist:
//!
//! * **Legacy piggyback** — a second connection to the primary socket URL
//!   with `commandChannel=true` appended, receive-only.
//! * **Bidirectional** — a dedicated connection (`type=voice-plus`) to the
//!   command URL, able to send command frames upstream.
//!
//! Listener registrations live in a map shared with the handler, so they
//! survive channel rebuilds after `reset()` and `set_language_code()`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Url;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use parley_core::{ChatConfig, ConversationId};

use crate::channel::{ChannelTuning, FrameHandler, QueuedChannel, socket_url};

/// Listener invoked with a command's payload (the frame minus its `event`
/// discriminator).
pub type CommandListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Listener registrations keyed by event name. Shared between the handler
/// and the live channel so rebuilds do not drop registrations.
pub type SharedListeners = Arc<Mutex<HashMap<String, Vec<CommandListener>>>>;

/// Wire mode of the command channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandMode {
    /// Second connection to the primary socket URL, receive-only.
    Legacy,
    /// Dedicated `type=voice-plus` connection, send-capable.
    Bidirectional,
}

/// A live command channel.
pub struct CommandChannel {
    channel: QueuedChannel,
    mode: CommandMode,
}

impl CommandChannel {
    /// Open the command channel for the given config and conversation.
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn open(
        config: &ChatConfig,
        language_code: &str,
        conversation_id: &ConversationId,
        listeners: SharedListeners,
        tuning: ChannelTuning,
    ) -> Self {
        let mode = if config.experimental.bidirectional {
            CommandMode::Bidirectional
        } else {
            CommandMode::Legacy
        };
        let url = command_url(config, language_code, conversation_id, mode);
        let on_frame: FrameHandler = Arc::new(move |text| dispatch_frame(text, &listeners));
        Self {
            channel: QueuedChannel::connect_with(url, on_frame, tuning),
            mode,
        }
    }

    /// Wire mode this channel was opened in.
    #[must_use]
    pub fn mode(&self) -> CommandMode {
        self.mode
    }

    /// Send a command frame upstream. Ignored (with a warning) in legacy
    /// mode, which is receive-only.
    pub fn send_command(&self, event: &str, payload: Value) {
        if self.mode != CommandMode::Bidirectional {
            warn!(event, "command channel is receive-only; frame dropped");
            return;
        }
        let mut frame = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                let _ = map.insert("payload".into(), other);
                map
            }
        };
        let _ = frame.insert("event".into(), json!(event));
        self.channel.send(Value::Object(frame).to_string());
    }

    /// Tear the channel down.
    pub fn close(&self) {
        self.channel.close();
    }
}

/// Parse one inbound frame and fan it out to the listeners registered for
/// its `event`. Frames without a string `event` field are dropped.
fn dispatch_frame(text: &str, listeners: &SharedListeners) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        warn!("command frame is not valid JSON; dropped");
        return;
    };
    let Some(event) = frame.get("event").and_then(Value::as_str) else {
        warn!("command frame has no event field; dropped");
        return;
    };
    let event = event.to_owned();
    let payload = strip_event(frame);

    // Snapshot before invoking so listeners may re-register freely.
    let targets: Vec<CommandListener> = listeners
        .lock()
        .get(&event)
        .map(|v| v.to_vec())
        .unwrap_or_default();
    if targets.is_empty() {
        debug!(event, "command received with no listeners");
    }
    for listener in targets {
        listener(&payload);
    }
}

fn strip_event(frame: Value) -> Value {
    match frame {
        Value::Object(mut map) => {
            let _ = map.remove("event");
            Value::Object(map)
        }
        other => other,
    }
}

/// Derive the command-channel URL for the given mode.
#[must_use]
pub fn command_url(
    config: &ChatConfig,
    language_code: &str,
    conversation_id: &ConversationId,
    mode: CommandMode,
) -> String {
    match mode {
        CommandMode::Legacy => {
            let base = socket_url(config, language_code, conversation_id);
            let Ok(mut url) = Url::parse(&base) else {
                return base;
            };
            let _ = url.query_pairs_mut().append_pair("commandChannel", "true");
            url.to_string()
        }
        CommandMode::Bidirectional => {
            let base = config
                .command_channel_url
                .as_deref()
                .unwrap_or(&config.application_url);
            let Ok(mut url) = Url::parse(base) else {
                warn!(url = %base, "command channel URL did not parse; using it verbatim");
                return base.to_string();
            };
            {
                let mut pairs = url.query_pairs_mut();
                let _ = pairs
                    .append_pair("type", "voice-plus")
                    .append_pair("languageCode", language_code)
                    .append_pair("conversationId", conversation_id.as_str());
                if let Some(api_key) = &config.api_key {
                    let _ = pairs.append_pair("apiKey", api_key);
                }
            }
            url.to_string()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
