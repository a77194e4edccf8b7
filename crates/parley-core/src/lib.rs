//! # parley-core
//!
//! Foundation types for the Parley conversation SDK.
//!
//! This crate provides the shared vocabulary the client engine builds on:
//!
//! - **Branded IDs**: [`ConversationId`], [`UserId`] as newtypes for type safety
//! - **Responses**: [`Response`] tagged union with `Application`, `User`, `Failure` variants
//! - **Requests**: [`StructuredRequest`] with dual-format slot normalization
//! - **State**: [`ConversationState`] snapshot and [`ConversationSeed`] for resumption
//! - **Config**: [`ChatConfig`] construction input with experimental flags
//! - **Errors**: [`ParleyError`] hierarchy via `thiserror`

#![deny(unsafe_code)]

pub mod config;
pub mod constants;
pub mod errors;
pub mod ids;
pub mod request;
pub mod response;
pub mod state;

pub use config::{ChannelType, ChatConfig, ExperimentalFlags};
pub use errors::{ParleyError, Result, TransportError};
pub use ids::{ConversationId, UserId};
pub use request::{Slot, SlotsInput, StructuredRequest, normalize_slots};
pub use response::{
    ApplicationMessage, ApplicationPayload, Choice, InboundPayload, Response, ResponseMetadata,
    UserPayload,
};
pub use state::{ConversationSeed, ConversationState};
