//! The state store: single authoritative snapshot plus subscriber fan-out.
//!
//! Every mutation goes through [`StateStore`], which replaces the snapshot
//! under one short lock and then notifies every subscriber with the full
//! log and the newly appended entry (if any). Exactly one notification per
//! logical change — the choice-selection patch and its appended entry share
//! a single fan-out via [`StateStore::patch_and_append`].
//!
//! The subscriber list is snapshotted before iteration, so subscribe and
//! unsubscribe calls made from inside a notification only affect subsequent
//! notifications. Locks are never held while subscriber callbacks run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use parley_core::{ConversationId, ConversationState, Response, UserId};

/// Handle identifying one subscriber registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Observer callback: receives the full log and the new entry, if the
/// notification was triggered by an append. Replay on subscribe passes
/// `None` for the new entry.
pub type SubscriberFn = dyn Fn(&[Response], Option<&Response>) + Send + Sync;

struct Subscriber {
    id: u64,
    callback: Arc<SubscriberFn>,
}

/// Partial state update merged into the snapshot by [`StateStore::set_state`].
#[derive(Default)]
pub struct StatePatch {
    /// Replace the response log wholesale.
    pub responses: Option<Vec<Response>>,
    /// Replace the conversation ID.
    pub conversation_id: Option<ConversationId>,
    /// Replace the language code.
    pub language_code: Option<String>,
    /// Replace the user identity.
    pub user_id: Option<UserId>,
}

/// Owner of the authoritative conversation snapshot.
pub struct StateStore {
    state: Mutex<ConversationState>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscription: AtomicU64,
}

impl StateStore {
    /// Create a store around an initial snapshot.
    #[must_use]
    pub fn new(state: ConversationState) -> Self {
        Self {
            state: Mutex::new(state),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Clone of the full snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ConversationState {
        self.state.lock().clone()
    }

    /// Clone of the response log.
    #[must_use]
    pub fn responses(&self) -> Vec<Response> {
        self.state.lock().responses.clone()
    }

    /// Current conversation ID.
    #[must_use]
    pub fn conversation_id(&self) -> ConversationId {
        self.state.lock().conversation_id.clone()
    }

    /// Current language code.
    #[must_use]
    pub fn language_code(&self) -> String {
        self.state.lock().language_code.clone()
    }

    /// Current user identity, if known.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.state.lock().user_id.clone()
    }

    /// Number of entries in the log.
    #[must_use]
    pub fn log_len(&self) -> usize {
        self.state.lock().responses.len()
    }

    /// Merge a partial update into the snapshot, then notify once.
    pub fn set_state(&self, patch: StatePatch, new_entry: Option<&Response>) {
        let log = {
            let mut state = self.state.lock();
            if let Some(responses) = patch.responses {
                state.responses = responses;
            }
            if let Some(conversation_id) = patch.conversation_id {
                state.conversation_id = conversation_id;
            }
            if let Some(language_code) = patch.language_code {
                state.language_code = language_code;
            }
            if let Some(user_id) = patch.user_id {
                state.user_id = Some(user_id);
            }
            state.responses.clone()
        };
        self.notify(&log, new_entry);
    }

    /// Append one entry and notify once with it.
    pub fn append(&self, entry: Response) {
        let log = {
            let mut state = self.state.lock();
            state.responses.push(entry.clone());
            state.responses.clone()
        };
        self.notify(&log, Some(&entry));
    }

    /// Mutate the existing log in place, append one entry, and notify once.
    ///
    /// This is the choice-selection path: the log grows by exactly one even
    /// though an earlier entry may also be patched.
    pub fn patch_and_append(&self, patch: impl FnOnce(&mut Vec<Response>), entry: Response) {
        let log = {
            let mut state = self.state.lock();
            patch(&mut state.responses);
            state.responses.push(entry.clone());
            state.responses.clone()
        };
        self.notify(&log, Some(&entry));
    }

    /// Register a subscriber and immediately replay the current log to it.
    ///
    /// Notification order equals subscription order.
    pub fn subscribe(
        &self,
        callback: impl Fn(&[Response], Option<&Response>) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let callback: Arc<SubscriberFn> = Arc::new(callback);
        self.subscribers.lock().push(Subscriber {
            id,
            callback: Arc::clone(&callback),
        });

        // Replay outside the subscriber lock.
        let log = self.responses();
        callback(&log, None);

        SubscriptionId(id)
    }

    /// Remove a subscriber. Unknown IDs are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().retain(|s| s.id != id.0);
    }

    /// Drop every subscriber (used by `destroy()`).
    pub fn clear_subscribers(&self) {
        self.subscribers.lock().clear();
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn notify(&self, log: &[Response], new_entry: Option<&Response>) {
        let snapshot: Vec<Arc<SubscriberFn>> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for callback in snapshot {
            callback(log, new_entry);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
