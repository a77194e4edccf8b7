//! The conversation handler: the single public entry point of the engine.
//!
//! A [`ConversationHandler`] owns the state store, the dispatcher, the
//! ingestor, and the live channels. Send methods follow the degradation
//! policy: they never return transport errors; failures surface as
//! `Failure` entries in the log. Only the awaited calls (`send_context`,
//! `get_voice_credentials`, `await_response`) return `Result`.
//!
//! Spawned tasks hold only a `Weak` reference to the internals, so dropping
//! the handler (or calling [`ConversationHandler::destroy`]) releases
//! everything without waiting for in-flight work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_core::constants::{AWAIT_RESPONSE_TIMEOUT, POLL_RETRY_DELAY};
use parley_core::{
    ChannelType, ChatConfig, ConversationId, ConversationSeed, ConversationState, ParleyError,
    Response, Result, StructuredRequest,
};

use crate::channel::{ChannelTuning, FrameHandler, QueuedChannel, socket_url};
use crate::command::{CommandChannel, CommandListener, SharedListeners};
use crate::dispatch::{AppendResponse, RequestDispatcher, RequestOverride, VoiceCredentials};
use crate::ingest::ResponseIngestor;
use crate::state::{StatePatch, StateStore, SubscriptionId};

/// Handle to one live conversation.
///
/// Cheap to clone; all clones share the same conversation.
#[derive(Clone)]
pub struct ConversationHandler {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<ChatConfig>,
    mode: ChannelType,
    store: Arc<StateStore>,
    dispatcher: RequestDispatcher,
    ingestor: ResponseIngestor,
    override_hook: Mutex<Option<RequestOverride>>,
    socket: Mutex<Option<QueuedChannel>>,
    command: Mutex<Option<CommandChannel>>,
    command_listeners: SharedListeners,
    tuning: ChannelTuning,
    destroyed: AtomicBool,
}

impl ConversationHandler {
    /// Start a fresh conversation. Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(config: ChatConfig) -> Self {
        Self::with_options(config, None, ChannelTuning::default())
    }

    /// Resume a conversation from prior-session material.
    #[must_use]
    pub fn with_seed(config: ChatConfig, seed: ConversationSeed) -> Self {
        Self::with_options(config, Some(seed), ChannelTuning::default())
    }

    /// Full-control constructor with explicit channel tuning.
    #[must_use]
    pub fn with_options(
        config: ChatConfig,
        seed: Option<ConversationSeed>,
        tuning: ChannelTuning,
    ) -> Self {
        let config = Arc::new(config);
        let mut state = ConversationState::new(&config.language_code, config.user_id.clone());
        if let Some(seed) = seed {
            state.responses = seed.responses;
            if let Some(conversation_id) = seed.conversation_id {
                state.conversation_id = conversation_id;
            }
        }
        let store = Arc::new(StateStore::new(state));
        let dispatcher = RequestDispatcher::new(Arc::clone(&config));
        let ingestor = ResponseIngestor::new(Arc::clone(&store), config.failure_text());

        let inner = Arc::new(Inner {
            mode: config.channel_type(),
            config,
            store,
            dispatcher,
            ingestor,
            override_hook: Mutex::new(None),
            socket: Mutex::new(None),
            command: Mutex::new(None),
            command_listeners: Arc::new(Mutex::new(std::collections::HashMap::new())),
            tuning,
            destroyed: AtomicBool::new(false),
        });
        inner.rebuild_channels();
        Self { inner }
    }

    // ── observation ──────────────────────────────────────────────────

    /// Register a subscriber; the current log is replayed immediately.
    pub fn subscribe(
        &self,
        callback: impl Fn(&[Response], Option<&Response>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.store.subscribe(callback)
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.store.unsubscribe(id);
    }

    /// Clone of the current response log.
    #[must_use]
    pub fn responses(&self) -> Vec<Response> {
        self.inner.store.responses()
    }

    /// Current conversation ID.
    #[must_use]
    pub fn conversation_id(&self) -> ConversationId {
        self.inner.store.conversation_id()
    }

    /// Current language code.
    #[must_use]
    pub fn language_code(&self) -> String {
        self.inner.store.language_code()
    }

    /// Wait for the next `Application` or `Failure` entry, up to `timeout`
    /// (default 10 seconds).
    pub async fn await_response(&self, timeout: Option<Duration>) -> Result<Response> {
        let timeout = timeout.unwrap_or(AWAIT_RESPONSE_TIMEOUT);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.inner.store.subscribe(move |_, new_entry| {
            if let Some(entry) = new_entry {
                if entry.is_application() || entry.is_failure() {
                    let _ = tx.send(entry.clone());
                }
            }
        });

        let result = tokio::time::timeout(timeout, rx.recv()).await;
        self.inner.store.unsubscribe(id);
        match result {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) | Err(_) => Err(ParleyError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    // ── sending ──────────────────────────────────────────────────────

    /// Send free text. The user turn is appended immediately; delivery is
    /// asynchronous and failures degrade into `Failure` entries.
    pub fn send_text(&self, text: impl Into<String>) {
        if self.inner.guard_destroyed("send_text") {
            return;
        }
        let text = text.into();
        let body = json!({ "request": { "unstructured": { "text": text } } });
        let envelope = self.inner.dispatcher.build_envelope(&self.inner.store, body);
        self.inner.store.append(Response::user_text(text));
        self.inner.spawn_dispatch(envelope);
    }

    /// Select a choice. The most recent application response presenting the
    /// choice is patched in place (every matching message in it), the user
    /// turn is appended, and the selection is dispatched.
    pub fn send_choice(&self, choice_id: impl Into<String>) {
        if self.inner.guard_destroyed("send_choice") {
            return;
        }
        let choice_id = choice_id.into();
        let patch_id = choice_id.clone();
        self.inner.store.patch_and_append(
            move |responses| {
                if !patch_choice(responses, &patch_id) {
                    debug!(choice_id = %patch_id, "no application message presents this choice");
                }
            },
            Response::user_choice(&choice_id),
        );
        self.dispatch_structured(
            StructuredRequest {
                choice_id: Some(choice_id),
                ..StructuredRequest::default()
            },
            None,
        );
    }

    /// Select a choice on an explicitly addressed message, bypassing the
    /// most-recent-response search.
    pub fn send_choice_at(
        &self,
        choice_id: impl Into<String>,
        response_index: usize,
        message_index: usize,
    ) {
        if self.inner.guard_destroyed("send_choice_at") {
            return;
        }
        let choice_id = choice_id.into();
        let patch_id = choice_id.clone();
        self.inner.store.patch_and_append(
            move |responses| {
                let patched = responses
                    .get_mut(response_index)
                    .and_then(Response::as_application_mut)
                    .and_then(|p| p.messages.get_mut(message_index))
                    .map(|m| m.selected_choice_id = Some(patch_id.clone()));
                if patched.is_none() {
                    warn!(
                        response_index,
                        message_index, "choice position does not address an application message"
                    );
                }
            },
            Response::user_choice(&choice_id),
        );
        self.dispatch_structured(
            StructuredRequest {
                choice_id: Some(choice_id),
                ..StructuredRequest::default()
            },
            None,
        );
    }

    /// Send a structured request.
    pub fn send_structured(&self, request: StructuredRequest) {
        if self.inner.guard_destroyed("send_structured") {
            return;
        }
        self.inner
            .store
            .append(Response::user_structured(request.clone()));
        self.dispatch_structured(request, None);
    }

    /// Send a structured request with a context object carried at the
    /// envelope's top level.
    pub fn send_structured_with_context(&self, request: StructuredRequest, context: Value) {
        if self.inner.guard_destroyed("send_structured_with_context") {
            return;
        }
        self.inner
            .store
            .append(Response::user_structured_with_context(
                request.clone(),
                context.clone(),
            ));
        self.dispatch_structured(request, Some(context));
    }

    fn dispatch_structured(&self, request: StructuredRequest, context: Option<Value>) {
        let mut body = json!({ "request": { "structured": request.to_wire() } });
        if let Some(context) = context {
            if let Value::Object(map) = &mut body {
                let _ = map.insert("context".into(), context);
            }
        }
        let envelope = self.inner.dispatcher.build_envelope(&self.inner.store, body);
        self.inner.spawn_dispatch(envelope);
    }

    /// Push a context update without producing a conversation turn. Always
    /// goes over HTTP; errors are returned, not degraded.
    pub async fn send_context(&self, context: Value) -> Result<()> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(ParleyError::Destroyed);
        }
        let envelope = self
            .inner
            .dispatcher
            .build_envelope(&self.inner.store, json!({ "context": context }));
        let url = self
            .inner
            .dispatcher
            .http_url(&self.inner.store.language_code());
        let _ = self.inner.dispatcher.post(&url, &envelope).await?;
        Ok(())
    }

    /// Fetch credentials for the external voice provider.
    pub async fn get_voice_credentials(&self) -> Result<VoiceCredentials> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(ParleyError::Destroyed);
        }
        Ok(self.inner.dispatcher.voice_credentials().await?)
    }

    // ── commands ─────────────────────────────────────────────────────

    /// Register a listener for a command event. Registrations survive
    /// channel rebuilds.
    pub fn on_command(&self, event: impl Into<String>, listener: CommandListener) {
        self.inner
            .command_listeners
            .lock()
            .entry(event.into())
            .or_default()
            .push(listener);
    }

    /// Remove every listener registered for an event.
    pub fn off_command(&self, event: &str) {
        let _ = self.inner.command_listeners.lock().remove(event);
    }

    /// Send a command frame upstream (bidirectional mode only).
    pub fn send_command(&self, event: &str, payload: Value) {
        if self.inner.guard_destroyed("send_command") {
            return;
        }
        let guard = self.inner.command.lock();
        match guard.as_ref() {
            Some(command) => command.send_command(event, payload),
            None => warn!(event, "no command channel is open; frame dropped"),
        }
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Start over under a fresh conversation ID, optionally clearing the
    /// log, and rebuild the channels against the new identity.
    pub fn reset(&self, clear_responses: bool) {
        if self.inner.guard_destroyed("reset") {
            return;
        }
        self.inner.store.set_state(
            StatePatch {
                conversation_id: Some(ConversationId::new()),
                responses: clear_responses.then(Vec::new),
                ..StatePatch::default()
            },
            None,
        );
        self.inner.rebuild_channels();
    }

    /// Switch the active language and rebuild the channels. Setting the
    /// current language again is a warned no-op.
    pub fn set_language_code(&self, language_code: impl Into<String>) {
        if self.inner.guard_destroyed("set_language_code") {
            return;
        }
        let language_code = language_code.into();
        if language_code == self.inner.store.language_code() {
            warn!(language_code, "language code unchanged; ignoring");
            return;
        }
        self.inner.store.set_state(
            StatePatch {
                language_code: Some(language_code),
                ..StatePatch::default()
            },
            None,
        );
        self.inner.rebuild_channels();
    }

    /// Install (or with `None`, remove) the transport-override hook. While
    /// installed, the hook receives every outbound envelope instead of the
    /// built-in transports.
    pub fn set_request_override(&self, hook: Option<RequestOverride>) {
        *self.inner.override_hook.lock() = hook;
    }

    /// Tear the conversation down: drop subscribers, close channels, and
    /// turn every subsequent send into a warned no-op.
    pub fn destroy(&self) {
        self.inner.destroyed.store(true, Ordering::Release);
        self.inner.store.clear_subscribers();
        if let Some(socket) = self.inner.socket.lock().take() {
            socket.close();
        }
        if let Some(command) = self.inner.command.lock().take() {
            command.close();
        }
    }
}

impl Inner {
    /// Warn-and-skip guard for the degradation policy on send paths.
    fn guard_destroyed(&self, operation: &str) -> bool {
        if self.destroyed.load(Ordering::Acquire) {
            warn!(operation, "handler destroyed; call ignored");
            return true;
        }
        false
    }

    /// (Re)open the channels against the current conversation identity.
    fn rebuild_channels(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        if let Some(old) = self.socket.lock().take() {
            old.close();
        }
        if let Some(old) = self.command.lock().take() {
            old.close();
        }

        let language_code = self.store.language_code();
        let conversation_id = self.store.conversation_id();

        if self.mode == ChannelType::Socket {
            let weak = Arc::downgrade(self);
            let on_frame: FrameHandler = Arc::new(move |text| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_frame(text);
                }
            });
            let url = socket_url(&self.config, &language_code, &conversation_id);
            *self.socket.lock() = Some(QueuedChannel::connect_with(
                url,
                on_frame,
                self.tuning.clone(),
            ));
        }

        if self.config.command_channel {
            // Legacy mode piggybacks on the primary socket URL, so it needs
            // the socket transport; bidirectional mode is scheme-independent.
            if self.config.experimental.bidirectional || self.mode == ChannelType::Socket {
                *self.command.lock() = Some(CommandChannel::open(
                    &self.config,
                    &language_code,
                    &conversation_id,
                    Arc::clone(&self.command_listeners),
                    self.tuning.clone(),
                ));
            } else {
                warn!("legacy command channel requires the socket transport; not opened");
            }
        }
    }

    /// Ingest an inbound socket frame.
    fn handle_frame(self: &Arc<Self>, text: &str) {
        if self.destroyed.load(Ordering::Acquire) {
            return;
        }
        let outcome = self.ingestor.ingest_text(text);
        if outcome.needs_poll {
            self.schedule_poll();
        }
    }

    /// Dispatch the delayed synthetic poll turn.
    fn schedule_poll(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        drop(tokio::spawn(async move {
            tokio::time::sleep(POLL_RETRY_DELAY).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.destroyed.load(Ordering::Acquire) {
                return;
            }
            let envelope = inner.dispatcher.build_envelope(
                &inner.store,
                json!({ "request": { "structured": StructuredRequest::poll().to_wire() } }),
            );
            inner.dispatch(envelope).await;
        }));
    }

    /// Hand an envelope to a background task for delivery.
    fn spawn_dispatch(self: &Arc<Self>, envelope: Value) {
        let inner = Arc::clone(self);
        drop(tokio::spawn(async move {
            inner.dispatch(envelope).await;
        }));
    }

    /// Deliver one envelope: override hook, else socket, else HTTP.
    async fn dispatch(self: &Arc<Self>, envelope: Value) {
        let hook = self.override_hook.lock().clone();
        if let Some(hook) = hook {
            let store = Arc::clone(&self.store);
            let append: AppendResponse = Arc::new(move |response| store.append(response));
            hook(envelope, append);
            return;
        }

        match self.mode {
            ChannelType::Socket => {
                let guard = self.socket.lock();
                if let Some(socket) = guard.as_ref() {
                    socket.send(envelope.to_string());
                } else {
                    warn!("no socket channel is open");
                    self.ingestor.fail();
                }
            }
            ChannelType::Http => {
                let url = self.dispatcher.http_url(&self.store.language_code());
                match self.dispatcher.post(&url, &envelope).await {
                    Ok(body) => {
                        let outcome = self.ingestor.ingest_value(body);
                        if outcome.needs_poll {
                            self.schedule_poll();
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "request dispatch failed");
                        self.ingestor.fail();
                    }
                }
            }
        }
    }
}

/// Patch the most recent application response presenting `choice_id`:
/// every message in it that presents the choice gets `selected_choice_id`
/// set. Returns whether anything was patched.
fn patch_choice(responses: &mut [Response], choice_id: &str) -> bool {
    for entry in responses.iter_mut().rev() {
        let Some(payload) = entry.as_application_mut() else {
            continue;
        };
        if !payload.messages.iter().any(|m| m.has_choice(choice_id)) {
            continue;
        }
        for message in &mut payload.messages {
            if message.has_choice(choice_id) {
                message.selected_choice_id = Some(choice_id.to_owned());
            }
        }
        return true;
    }
    false
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
