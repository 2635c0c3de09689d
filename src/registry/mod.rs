//! AIRC registry client
//!
//! Presence, messaging and consent against the remote registry.

mod api;
mod client;
mod http;
#[cfg(test)]
pub(crate) mod mock;
mod types;

pub use api::RegistryApi;
pub use client::{ConsentHandler, MessageHandler, RegistryClient, CLIENT_ID};
pub use http::HttpRegistry;
pub use types::{
    normalize_handle, Ack, ConsentAction, ConsentDecision, ConsentRequest, InboundMessage,
    MessageKind, OutgoingMessage, Payload, PresenceAction, PresenceRecord, PresenceUpdate,
    RegisterResponse, Registration, TypedPayload,
};
