//! Registry API abstraction

use super::types::{
    Ack, ConsentDecision, InboundMessage, OutgoingMessage, PresenceRecord, PresenceUpdate,
    RegisterResponse,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Remote presence-and-messaging registry
///
/// One method per registry endpoint. Implementations report transport faults
/// as `Err` and hand back the registry's reply body otherwise; interpreting
/// business-level success is left to [`RegistryClient`](super::RegistryClient).
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// `POST /presence` with `action: register`
    async fn register(&self, update: &PresenceUpdate) -> Result<RegisterResponse>;

    /// `POST /presence` with `action: heartbeat`
    async fn heartbeat(&self, token: &str, update: &PresenceUpdate) -> Result<Ack>;

    /// `GET /messages?user=&since=`
    async fn fetch_messages(
        &self,
        token: &str,
        user: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboundMessage>>;

    /// `POST /messages`
    async fn post_message(&self, token: &str, message: &OutgoingMessage) -> Result<Ack>;

    /// `GET /presence` (unauthenticated)
    async fn list_presence(&self) -> Result<Vec<PresenceRecord>>;

    /// `POST /consent`
    async fn post_consent(&self, token: &str, decision: &ConsentDecision) -> Result<Ack>;
}
