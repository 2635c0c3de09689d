//! Scripted in-memory registry for tests

use super::api::RegistryApi;
use super::types::{
    Ack, ConsentDecision, InboundMessage, MessageKind, OutgoingMessage, PresenceAction,
    PresenceRecord, PresenceUpdate, RegisterResponse,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A recorded registry call
#[derive(Debug, Clone)]
pub(crate) enum Call {
    Register(PresenceUpdate),
    Heartbeat { token: String, working_on: String },
    Fetch { token: String, since: DateTime<Utc> },
    PostMessage(OutgoingMessage),
    ListPresence,
    Consent(ConsentDecision),
}

pub(crate) struct MockRegistry {
    pub register_reply: Mutex<RegisterResponse>,
    pub fail_transport: AtomicBool,
    pub batches: Mutex<VecDeque<Vec<InboundMessage>>>,
    pub presence: Mutex<Vec<PresenceRecord>>,
    pub send_ack: Mutex<Ack>,
    pub calls: Mutex<Vec<Call>>,
    /// `post_message` never resolves while set
    pub hang_post_message: AtomicBool,
    /// `post_consent` never resolves while set
    pub hang_consent: AtomicBool,
    /// Fetches wait for a permit on this gate while set
    pub fetch_gate: Mutex<Option<Arc<Notify>>>,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self {
            register_reply: Mutex::new(RegisterResponse {
                success: true,
                token: Some("T1".to_string()),
                session_id: Some("S1".to_string()),
                message: None,
                error: None,
            }),
            fail_transport: AtomicBool::new(false),
            batches: Mutex::new(VecDeque::new()),
            presence: Mutex::new(Vec::new()),
            send_ack: Mutex::new(Ack::default()),
            calls: Mutex::new(Vec::new()),
            hang_post_message: AtomicBool::new(false),
            hang_consent: AtomicBool::new(false),
            fetch_gate: Mutex::new(None),
        }
    }
}

impl MockRegistry {
    pub fn rejecting(message: &str) -> Self {
        let mock = Self::default();
        *mock.register_reply.lock() = RegisterResponse {
            success: false,
            message: Some(message.to_string()),
            ..Default::default()
        };
        mock
    }

    pub fn push_batch(&self, batch: Vec<InboundMessage>) {
        self.batches.lock().push_back(batch);
    }

    pub fn set_fail_transport(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    /// Hold every fetch until `notify_one` is called on the returned gate
    pub fn gate_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.fetch_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().push(call);
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(Error::Registry("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Build an inbound message for tests
pub(crate) fn message(id: &str, from: &str, kind: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        from: from.to_string(),
        to: "claude".to_string(),
        text: text.to_string(),
        kind: MessageKind::from(kind),
        payload: None,
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        signature: None,
    }
}

#[async_trait]
impl RegistryApi for MockRegistry {
    async fn register(&self, update: &PresenceUpdate) -> Result<RegisterResponse> {
        assert_eq!(update.action, PresenceAction::Register);
        self.record(Call::Register(update.clone()))?;
        Ok(self.register_reply.lock().clone())
    }

    async fn heartbeat(&self, token: &str, update: &PresenceUpdate) -> Result<Ack> {
        self.record(Call::Heartbeat {
            token: token.to_string(),
            working_on: update.working_on.clone(),
        })?;
        Ok(Ack::default())
    }

    async fn fetch_messages(
        &self,
        token: &str,
        _user: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InboundMessage>> {
        self.record(Call::Fetch {
            token: token.to_string(),
            since,
        })?;
        let gate = self.fetch_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }

    async fn post_message(&self, _token: &str, message: &OutgoingMessage) -> Result<Ack> {
        self.record(Call::PostMessage(message.clone()))?;
        if self.hang_post_message.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self.send_ack.lock().clone())
    }

    async fn list_presence(&self) -> Result<Vec<PresenceRecord>> {
        self.record(Call::ListPresence)?;
        Ok(self.presence.lock().clone())
    }

    async fn post_consent(&self, _token: &str, decision: &ConsentDecision) -> Result<Ack> {
        self.record(Call::Consent(decision.clone()))?;
        if self.hang_consent.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(Ack {
            success: Some(true),
            ..Default::default()
        })
    }
}
