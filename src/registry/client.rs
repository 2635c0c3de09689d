//! Registry session client
//!
//! Owns the agent's registry session: registration, bearer token, polling
//! watermark and the poll/heartbeat schedule. Inbound items are classified
//! and dispatched to the registered message or consent handlers.
//!
//! ## Lifecycle
//!
//! ```text
//! Unregistered --register()--> Registered --start()--> Polling
//!                                   ^                     |
//!                                   +------stop()---------+
//! ```

use super::api::RegistryApi;
use super::http::HttpRegistry;
use super::types::{
    ConsentAction, ConsentDecision, ConsentRequest, InboundMessage, MessageKind,
    OutgoingMessage, PresenceAction, PresenceRecord, PresenceUpdate, Registration,
    normalize_handle,
};
use crate::config::{AgentConfig, AircConfig};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

/// Identifier sent as `client` with every presence update
pub const CLIENT_ID: &str = concat!("airc-bridge/", env!("CARGO_PKG_VERSION"));

/// Callback receiving inbound (non-consent) messages
pub type MessageHandler = Arc<dyn Fn(InboundMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback receiving consent requests
pub type ConsentHandler = Arc<dyn Fn(ConsentRequest) -> BoxFuture<'static, ()> + Send + Sync>;

/// Mutable session state, serialized behind one lock
struct SessionState {
    token: Option<String>,
    session_id: Option<String>,
    working_on: String,
    connected: bool,
    /// Messages at or before this instant count as delivered
    watermark: Option<DateTime<Utc>>,
}

/// Client for the AIRC registry
pub struct RegistryClient {
    handle: String,
    is_agent: bool,
    operator: Option<String>,
    api: Arc<dyn RegistryApi>,
    state: RwLock<SessionState>,
    message_handlers: parking_lot::RwLock<Vec<MessageHandler>>,
    consent_handlers: parking_lot::RwLock<Vec<ConsentHandler>>,
    /// Present while the poll/heartbeat schedule runs
    shutdown: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    span: tracing::Span,
}

impl RegistryClient {
    /// Create an unregistered client for `agent` talking to `api`
    pub fn new(agent: &AgentConfig, api: Arc<dyn RegistryApi>) -> Self {
        let handle = normalize_handle(&agent.handle).to_string();
        let span = tracing::info_span!("airc", handle = %handle);
        Self {
            handle,
            is_agent: agent.is_agent,
            operator: agent.operator.clone(),
            api,
            state: RwLock::new(SessionState {
                token: None,
                session_id: None,
                working_on: agent.working_on.clone(),
                connected: false,
                watermark: None,
            }),
            message_handlers: parking_lot::RwLock::new(Vec::new()),
            consent_handlers: parking_lot::RwLock::new(Vec::new()),
            shutdown: parking_lot::Mutex::new(None),
            span,
        }
    }

    /// Create a client using the HTTP registry named in `config`
    pub fn from_config(config: &AircConfig) -> Self {
        Self::new(
            &config.agent,
            Arc::new(HttpRegistry::new(config.registry.url.clone())),
        )
    }

    /// Replace the span that background tasks are instrumented with
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub async fn is_registered(&self) -> bool {
        self.state.read().await.token.is_some()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    /// Whether the poll/heartbeat schedule is running
    pub fn is_polling(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.read().await.session_id.clone()
    }

    pub async fn watermark(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.watermark
    }

    pub async fn working_on(&self) -> String {
        self.state.read().await.working_on.clone()
    }

    async fn token(&self) -> Option<String> {
        self.state.read().await.token.clone()
    }

    async fn presence_update(&self, action: PresenceAction) -> PresenceUpdate {
        PresenceUpdate {
            action,
            username: self.handle.clone(),
            working_on: self.working_on().await,
            status: "online".to_string(),
            is_agent: self.is_agent,
            operator: self.operator.clone(),
            client: CLIENT_ID.to_string(),
        }
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Register the agent and store the issued credentials.
    ///
    /// Rejections and transport faults both come back as `Err` and leave the
    /// client unregistered.
    pub async fn register(&self) -> Result<Registration> {
        let update = self.presence_update(PresenceAction::Register).await;

        let reply = self.api.register(&update).await.map_err(|e| {
            tracing::warn!(handle = %self.handle, "Registration request failed: {}", e);
            e
        })?;

        if !reply.success {
            let reason = reply
                .message
                .or(reply.error)
                .unwrap_or_else(|| "registration rejected".to_string());
            tracing::warn!(handle = %self.handle, "Registry rejected registration: {}", reason);
            return Err(Error::Registry(reason));
        }

        let token = reply
            .token
            .ok_or_else(|| Error::Registry("registration reply carried no token".to_string()))?;

        let mut state = self.state.write().await;
        state.token = Some(token.clone());
        state.session_id = reply.session_id.clone();
        state.connected = true;
        let now = Utc::now();
        state.watermark = Some(state.watermark.map_or(now, |w| w.max(now)));
        drop(state);

        tracing::info!(
            handle = %self.handle,
            session_id = reply.session_id.as_deref().unwrap_or("-"),
            "Registered with AIRC registry"
        );

        Ok(Registration {
            token,
            session_id: reply.session_id,
        })
    }

    /// Start polling and heartbeats.
    ///
    /// The first poll fires immediately, the first heartbeat after one
    /// heartbeat interval. Calling `start` again replaces the running
    /// schedule.
    pub async fn start(
        self: &Arc<Self>,
        poll_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Result<()> {
        if !self.is_registered().await {
            return Err(Error::NotRegistered);
        }
        if poll_interval.is_zero() || heartbeat_interval.is_zero() {
            return Err(Error::Config(
                "poll and heartbeat intervals must be non-zero".to_string(),
            ));
        }

        let (tx, rx) = watch::channel(false);
        let previous = self.shutdown.lock().replace(tx);
        if let Some(previous) = previous {
            let _ = previous.send(true);
        }
        self.state.write().await.connected = true;

        tokio::spawn(
            run_poll_loop(Arc::downgrade(self), poll_interval, rx.clone())
                .instrument(self.span.clone()),
        );
        tokio::spawn(
            run_heartbeat_loop(Arc::downgrade(self), heartbeat_interval, rx)
                .instrument(self.span.clone()),
        );

        tracing::info!(
            handle = %self.handle,
            poll_ms = poll_interval.as_millis() as u64,
            heartbeat_ms = heartbeat_interval.as_millis() as u64,
            "Registry polling started"
        );
        Ok(())
    }

    /// Stop polling and heartbeats. Calls already in flight still complete.
    pub async fn stop(&self) {
        let sender = self.shutdown.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(true);
            tracing::info!(handle = %self.handle, "Registry polling stopped");
        }
        self.state.write().await.connected = false;
    }

    // =========================================================================
    // Periodic actions
    // =========================================================================

    /// Announce the current status. Does nothing while unregistered.
    pub async fn heartbeat(&self) -> Result<()> {
        let Some(token) = self.token().await else {
            return Ok(());
        };
        let update = self.presence_update(PresenceAction::Heartbeat).await;
        let ack = self.api.heartbeat(&token, &update).await?;
        if !ack.is_accepted() {
            return Err(Error::Registry(ack.reason()));
        }
        Ok(())
    }

    /// Fetch messages newer than the watermark and dispatch them.
    ///
    /// A non-empty fetch moves the watermark to the current time, not to the
    /// newest message timestamp; a message stored between the fetch and that
    /// update is never fetched. Returns the whole batch.
    pub async fn poll(&self) -> Result<Vec<InboundMessage>> {
        let (token, since) = {
            let state = self.state.read().await;
            match &state.token {
                Some(token) => (token.clone(), state.watermark.unwrap_or_else(Utc::now)),
                None => return Ok(Vec::new()),
            }
        };

        let batch = self.api.fetch_messages(&token, &self.handle, since).await?;
        if batch.is_empty() {
            return Ok(batch);
        }

        self.advance_watermark(Utc::now()).await;

        let batch: Vec<InboundMessage> =
            batch.into_iter().map(InboundMessage::normalized).collect();
        tracing::debug!(handle = %self.handle, count = batch.len(), "Fetched inbound messages");

        let message_handlers = self.message_handlers.read().clone();
        let consent_handlers = self.consent_handlers.read().clone();

        for item in &batch {
            if item.is_consent_request() {
                let request = ConsentRequest::from(item.clone());
                tracing::info!(handle = %self.handle, from = %request.from, "Consent request received");
                for handler in &consent_handlers {
                    handler(request.clone()).await;
                }
            } else {
                for handler in &message_handlers {
                    handler(item.clone()).await;
                }
            }
        }

        Ok(batch)
    }

    async fn advance_watermark(&self, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.watermark = Some(state.watermark.map_or(now, |w| w.max(now)));
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send a text message to `to` (a leading `@` is ignored)
    pub async fn send(
        &self,
        to: &str,
        text: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        let token = self.token().await.ok_or(Error::NotRegistered)?;

        let message = OutgoingMessage {
            from: self.handle.clone(),
            to: normalize_handle(to).to_string(),
            text: text.to_string(),
            kind: MessageKind::Text,
            payload,
        };

        let ack = self.api.post_message(&token, &message).await?;
        if !ack.is_accepted() {
            return Err(Error::Registry(ack.reason()));
        }

        tracing::debug!(handle = %self.handle, to = %message.to, "Message sent");
        Ok(())
    }

    /// List active agents. Any failure yields an empty list.
    pub async fn get_presence(&self) -> Vec<PresenceRecord> {
        match self.api.list_presence().await {
            Ok(agents) => agents,
            Err(e) => {
                tracing::warn!("Presence fetch failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Allow `from` to message this agent
    pub async fn accept_consent(&self, from: &str) -> bool {
        self.decide(ConsentAction::Accept, from).await
    }

    /// Block `from` from messaging this agent
    pub async fn block_agent(&self, from: &str) -> bool {
        self.decide(ConsentAction::Block, from).await
    }

    async fn decide(&self, action: ConsentAction, from: &str) -> bool {
        let Some(token) = self.token().await else {
            tracing::warn!(handle = %self.handle, ?action, "Consent decision while unregistered");
            return false;
        };

        let decision = ConsentDecision {
            action,
            from: normalize_handle(from).to_string(),
            handle: self.handle.clone(),
        };

        match self.api.post_consent(&token, &decision).await {
            Ok(ack) if ack.is_accepted() => {
                tracing::info!(handle = %self.handle, ?action, from = %decision.from, "Consent decision recorded");
                true
            }
            Ok(ack) => {
                tracing::warn!(?action, from = %decision.from, "Consent decision rejected: {}", ack.reason());
                false
            }
            Err(e) => {
                tracing::warn!(?action, from = %decision.from, "Consent decision failed: {}", e);
                false
            }
        }
    }

    // =========================================================================
    // Handlers and local state
    // =========================================================================

    /// Add a message handler. Handlers run in registration order.
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: MessageHandler = Arc::new(move |msg| handler(msg).boxed());
        self.message_handlers.write().push(handler);
    }

    /// Add a consent-request handler. Handlers run in registration order.
    pub fn on_consent_request<F, Fut>(&self, handler: F)
    where
        F: Fn(ConsentRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ConsentHandler = Arc::new(move |req| handler(req).boxed());
        self.consent_handlers.write().push(handler);
    }

    /// Update the status line sent with the next heartbeat
    pub async fn set_working_on(&self, text: impl Into<String>) {
        self.state.write().await.working_on = text.into();
    }
}

async fn run_poll_loop(
    client: Weak<RegistryClient>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let Some(client) = client.upgrade() else {
            break;
        };
        if let Err(e) = client.poll().await {
            tracing::warn!("Poll failed: {}", e);
        }
    }
}

async fn run_heartbeat_loop(
    client: Weak<RegistryClient>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let Some(client) = client.upgrade() else {
            break;
        };
        if let Err(e) = client.heartbeat().await {
            tracing::warn!("Heartbeat failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::mock::{message, Call, MockRegistry};
    use crate::registry::types::{Payload, TypedPayload};
    use parking_lot::Mutex;

    fn agent() -> AgentConfig {
        AgentConfig {
            handle: "claude".to_string(),
            working_on: "Available".to_string(),
            is_agent: true,
            operator: Some("alice".to_string()),
        }
    }

    fn make_client(mock: MockRegistry) -> (Arc<RegistryClient>, Arc<MockRegistry>) {
        let mock = Arc::new(mock);
        let client = Arc::new(RegistryClient::new(&agent(), mock.clone()));
        (client, mock)
    }

    fn collect_messages(client: &RegistryClient) -> Arc<Mutex<Vec<InboundMessage>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.on_message(move |msg| {
            let sink = sink.clone();
            async move { sink.lock().push(msg) }
        });
        seen
    }

    fn collect_consents(client: &RegistryClient) -> Arc<Mutex<Vec<ConsentRequest>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.on_consent_request(move |req| {
            let sink = sink.clone();
            async move { sink.lock().push(req) }
        });
        seen
    }

    fn is_fetch(call: &Call) -> bool {
        matches!(call, Call::Fetch { .. })
    }

    fn is_heartbeat(call: &Call) -> bool {
        matches!(call, Call::Heartbeat { .. })
    }

    #[tokio::test]
    async fn test_new_client_is_unregistered() {
        let (client, _mock) = make_client(MockRegistry::default());
        assert_eq!(client.handle(), "claude");
        assert!(!client.is_registered().await);
        assert!(!client.is_connected().await);
        assert!(!client.is_polling());
        assert!(client.watermark().await.is_none());
    }

    #[tokio::test]
    async fn test_register_stores_session() {
        let (client, mock) = make_client(MockRegistry::default());

        let registration = client.register().await.unwrap();
        assert_eq!(registration.token, "T1");
        assert_eq!(registration.session_id.as_deref(), Some("S1"));

        assert!(client.is_registered().await);
        assert!(client.is_connected().await);
        assert_eq!(client.session_id().await.as_deref(), Some("S1"));
        assert!(client.watermark().await.is_some());

        match &mock.calls()[0] {
            Call::Register(update) => {
                assert_eq!(update.username, "claude");
                assert_eq!(update.operator.as_deref(), Some("alice"));
                assert_eq!(update.client, CLIENT_ID);
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_rejection_keeps_unregistered() {
        let (client, _mock) = make_client(MockRegistry::rejecting("handle taken"));

        let err = client.register().await.unwrap_err();
        assert!(err.to_string().contains("handle taken"));
        assert!(!client.is_registered().await);
        assert!(!client.is_connected().await);
        assert!(client.watermark().await.is_none());
    }

    #[tokio::test]
    async fn test_register_transport_failure_keeps_unregistered() {
        let (client, mock) = make_client(MockRegistry::default());
        mock.set_fail_transport(true);

        assert!(client.register().await.is_err());
        assert!(!client.is_registered().await);
    }

    #[tokio::test]
    async fn test_register_without_token_fails() {
        let mock = MockRegistry::default();
        mock.register_reply.lock().token = None;
        let (client, _mock) = make_client(mock);

        assert!(matches!(client.register().await, Err(Error::Registry(_))));
        assert!(!client.is_registered().await);
    }

    #[tokio::test]
    async fn test_send_before_register_makes_no_call() {
        let (client, mock) = make_client(MockRegistry::default());

        let result = client.send("bob", "hello", None).await;
        assert!(matches!(result, Err(Error::NotRegistered)));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_normalizes_recipient() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();

        client
            .send("@bob", "hello", Some(serde_json::json!({"k": 1})))
            .await
            .unwrap();

        let sent: Vec<OutgoingMessage> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PostMessage(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "bob");
        assert_eq!(sent[0].from, "claude");
        assert_eq!(sent[0].kind, MessageKind::Text);
        assert_eq!(sent[0].payload, Some(serde_json::json!({"k": 1})));
    }

    #[tokio::test]
    async fn test_send_explicit_failure() {
        let mock = MockRegistry::default();
        *mock.send_ack.lock() = crate::registry::types::Ack {
            success: Some(false),
            message: None,
            error: Some("consent required".to_string()),
        };
        let (client, _mock) = make_client(mock);
        client.register().await.unwrap();

        let err = client.send("bob", "hi", None).await.unwrap_err();
        assert!(err.to_string().contains("consent required"));
    }

    #[tokio::test]
    async fn test_poll_unregistered_is_empty() {
        let (client, mock) = make_client(MockRegistry::default());
        assert!(client.poll().await.unwrap().is_empty());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_poll_empty_does_not_advance_watermark() {
        let (client, _mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();
        let before = client.watermark().await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(client.poll().await.unwrap().is_empty());
        assert_eq!(client.watermark().await, before);
    }

    #[tokio::test]
    async fn test_poll_advances_watermark_monotonically() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();
        mock.push_batch(vec![message("m1", "bob", "text", "one")]);
        mock.push_batch(vec![]);
        mock.push_batch(vec![message("m2", "bob", "text", "two")]);

        let mut last = client.watermark().await.unwrap();
        for _ in 0..3 {
            client.poll().await.unwrap();
            let current = client.watermark().await.unwrap();
            assert!(current >= last);
            last = current;
        }

        let sinces: Vec<DateTime<Utc>> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Fetch { since, .. } => Some(since),
                _ => None,
            })
            .collect();
        assert_eq!(sinces.len(), 3);
        assert!(sinces.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_poll_routes_by_classification() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();
        let messages = collect_messages(&client);
        let consents = collect_consents(&client);

        let mut handshake = message("m3", "dave", "text", "");
        handshake.payload = Some(Payload::Typed(TypedPayload::Handshake {
            message: Some("hi dave here".to_string()),
        }));
        mock.push_batch(vec![
            message("m1", "@bob", "text", "hello"),
            message("m2", "@carol", "consent_request", "may I?"),
            handshake,
            message("m4", "erin", "code_review", "PR #4"),
        ]);

        let batch = client.poll().await.unwrap();
        assert_eq!(batch.len(), 4);

        let messages = messages.lock();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].from, "bob");
        assert_eq!(messages[1].id, "m4");
        assert!(messages.iter().all(|m| !m.is_consent_request()));

        let consents = consents.lock();
        assert_eq!(consents.len(), 2);
        assert_eq!(consents[0].from, "carol");
        assert_eq!(consents[0].message.as_deref(), Some("may I?"));
        assert_eq!(consents[1].from, "dave");
        assert_eq!(consents[1].message.as_deref(), Some("hi dave here"));
    }

    #[tokio::test]
    async fn test_every_handler_runs_in_order() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "second"] {
            let order = order.clone();
            client.on_message(move |msg| {
                let order = order.clone();
                async move { order.lock().push(format!("{}:{}", tag, msg.id)) }
            });
        }

        mock.push_batch(vec![
            message("a", "bob", "text", "1"),
            message("b", "bob", "text", "2"),
        ]);
        client.poll().await.unwrap();

        assert_eq!(
            *order.lock(),
            vec!["first:a", "second:a", "second:a", "first:b", "second:b", "second:b"]
        );
    }

    #[tokio::test]
    async fn test_start_requires_registration() {
        let (client, _mock) = make_client(MockRegistry::default());
        let result = client
            .start(Duration::from_millis(100), Duration::from_millis(1000))
            .await;
        assert!(matches!(result, Err(Error::NotRegistered)));
        assert!(!client.is_polling());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (client, _mock) = make_client(MockRegistry::default());
        client.stop().await;
        client.stop().await;
        assert!(!client.is_polling());

        client.register().await.unwrap();
        client
            .start(Duration::from_millis(100), Duration::from_millis(1000))
            .await
            .unwrap();
        assert!(client.is_polling());

        client.stop().await;
        client.stop().await;
        assert!(!client.is_polling());
        assert!(!client.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_poll_delivers_message() {
        let (client, mock) = make_client(MockRegistry::default());
        let registration = client.register().await.unwrap();
        assert_eq!(registration.token, "T1");
        let seen = collect_messages(&client);
        mock.push_batch(vec![message("m1", "@bob", "text", "hey")]);

        client
            .start(Duration::from_millis(100), Duration::from_millis(1000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from, "bob");
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_ticks_on_fixed_intervals() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();

        client
            .start(Duration::from_millis(1000), Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(mock.count(is_fetch), 1);
        assert_eq!(mock.count(is_heartbeat), 3);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_schedule() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();
        mock.set_fail_transport(true);

        client
            .start(Duration::from_millis(100), Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(mock.count(is_fetch), 5);
        assert_eq!(mock.count(is_heartbeat), 4);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_schedule() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();

        client
            .start(Duration::from_millis(100), Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        client.stop().await;

        let polls = mock.count(is_fetch);
        let beats = mock.count(is_heartbeat);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(mock.count(is_fetch), polls);
        assert_eq!(mock.count(is_heartbeat), beats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_in_flight_at_stop_completes() {
        let (client, mock) = make_client(MockRegistry::default());
        let seen = collect_messages(&client);
        client.register().await.unwrap();
        let registered_at = client.watermark().await.unwrap();

        mock.push_batch(vec![message("m1", "bob", "text", "late")]);
        let gate = mock.gate_fetches();
        client
            .start(Duration::from_secs(3), Duration::from_secs(30))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.count(is_fetch), 1);

        client.stop().await;
        assert!(!client.is_polling());

        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(seen.lock().len(), 1);
        assert!(client.watermark().await.unwrap() >= registered_at);
        assert!(!client.is_polling());
        assert!(!client.is_connected().await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mock.count(is_fetch), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_schedule() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();

        client
            .start(Duration::from_millis(100), Duration::from_secs(60))
            .await
            .unwrap();
        client
            .start(Duration::from_millis(100), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        // one loop: ticks at 0, 100, 200
        assert_eq!(mock.count(is_fetch), 3);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_heartbeat_unregistered_is_noop() {
        let (client, mock) = make_client(MockRegistry::default());
        client.heartbeat().await.unwrap();
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_carries_working_on() {
        let (client, mock) = make_client(MockRegistry::default());
        client.register().await.unwrap();
        client.set_working_on("reviewing PR #12").await;
        let watermark = client.watermark().await;

        client.heartbeat().await.unwrap();

        let beat = mock.calls().into_iter().find_map(|c| match c {
            Call::Heartbeat { token, working_on } => Some((token, working_on)),
            _ => None,
        });
        assert_eq!(
            beat,
            Some(("T1".to_string(), "reviewing PR #12".to_string()))
        );
        assert_eq!(client.watermark().await, watermark);
    }

    #[tokio::test]
    async fn test_get_presence_swallows_failure() {
        let (client, mock) = make_client(MockRegistry::default());
        mock.presence.lock().push(PresenceRecord {
            handle: "bob".to_string(),
            username: None,
            status: "online".to_string(),
            working_on: None,
            is_agent: Some(true),
            last_seen: None,
        });

        assert_eq!(client.get_presence().await.len(), 1);

        mock.set_fail_transport(true);
        assert!(client.get_presence().await.is_empty());
    }

    #[tokio::test]
    async fn test_consent_decisions() {
        let (client, mock) = make_client(MockRegistry::default());
        assert!(!client.accept_consent("bob").await);

        client.register().await.unwrap();
        assert!(client.accept_consent("@bob").await);
        assert!(client.block_agent("spammer").await);

        let decisions: Vec<ConsentDecision> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Consent(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].action, ConsentAction::Accept);
        assert_eq!(decisions[0].from, "bob");
        assert_eq!(decisions[0].handle, "claude");
        assert_eq!(decisions[1].action, ConsentAction::Block);

        mock.set_fail_transport(true);
        assert!(!client.block_agent("spammer").await);
    }
}
