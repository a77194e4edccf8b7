//! # parley-client
//!
//! The Parley conversation session engine.
//!
//! [`ConversationHandler`] is the entry point: it owns the ordered response
//! log, fans state changes out to subscribers, and moves requests over
//! either a queued reconnect-tolerant WebSocket or unary HTTP, as decided
//! by the configured application URL. Transport failures never surface from
//! the send methods; they degrade into `Failure` entries in the log.
//!
//! ```no_run
//! use parley_client::ConversationHandler;
//! use parley_core::ChatConfig;
//!
//! # async fn run() {
//! let handler = ConversationHandler::new(ChatConfig::new("https://bots.example/c/support"));
//! let _sub = handler.subscribe(|log, new_entry| {
//!     if new_entry.is_some() {
//!         println!("log has {} entries", log.len());
//!     }
//! });
//! handler.send_text("I need help with my order");
//! # }
//! ```

#![deny(unsafe_code)]

pub mod channel;
pub mod command;
pub mod dispatch;
pub mod handler;
pub mod ingest;
pub mod state;

pub use channel::{ChannelTuning, QueuedChannel};
pub use command::{CommandChannel, CommandListener, CommandMode};
pub use dispatch::{AppendResponse, RequestDispatcher, RequestOverride, VoiceCredentials};
pub use handler::ConversationHandler;
pub use ingest::{IngestOutcome, ResponseIngestor};
pub use state::{StatePatch, StateStore, SubscriberFn, SubscriptionId};
