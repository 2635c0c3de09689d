//! Relay bridge between the AIRC registry and the local gateway
//!
//! Wraps a [`RegistryClient`] and keeps a duplex link to the local gateway
//! open. Registry messages are forwarded to the gateway as `airc:*` frames;
//! gateway commands are turned into registry calls. Only the gateway link
//! reconnects: closes are retried with exponential backoff until the
//! attempt ceiling is reached.
//!
//! ```text
//! Registry <--HTTP--> RegistryClient <--handlers--> AircBridge <--WS--> Gateway
//! ```

use crate::config::AircConfig;
use crate::error::{Error, Result};
use crate::gateway::{
    BridgeFrame, GatewayConnector, GatewayLink, HostCommand, LinkEvent, ReconnectPolicy,
    WsConnector,
};
use crate::registry::{
    HttpRegistry, InboundMessage, PresenceRecord, RegistryApi, RegistryClient,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Called once the bridge is fully started
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// Called for every inbound registry message
pub type MessageCallback = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Called for startup failures and gateway link errors
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Gateway link status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Never opened
    #[default]
    Absent,
    Connecting,
    Open,
    Closed,
}

#[derive(Default)]
struct LinkState {
    status: ConnectionStatus,
    /// Reconnect attempts since the last successful open
    attempts: u32,
    outbound: Option<mpsc::UnboundedSender<String>>,
    stopped: bool,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

/// Write a frame to the gateway if the link is open
fn forward(link: &Mutex<LinkState>, frame: &BridgeFrame) -> bool {
    let json = match frame.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to serialize gateway frame: {}", e);
            return false;
        }
    };

    let state = link.lock();
    match &state.outbound {
        Some(tx) if state.status == ConnectionStatus::Open => tx.send(json).is_ok(),
        _ => {
            tracing::debug!("Gateway link not open, dropping frame");
            false
        }
    }
}

/// Builder for [`AircBridge`]
pub struct BridgeBuilder {
    config: AircConfig,
    registry: Option<Arc<dyn RegistryApi>>,
    connector: Option<Arc<dyn GatewayConnector>>,
    on_ready: Option<ReadyCallback>,
    on_message: Option<MessageCallback>,
    on_error: Option<ErrorCallback>,
    span: Option<tracing::Span>,
}

impl BridgeBuilder {
    pub fn new(config: AircConfig) -> Self {
        Self {
            config,
            registry: None,
            connector: None,
            on_ready: None,
            on_message: None,
            on_error: None,
            span: None,
        }
    }

    /// Use a custom registry API instead of HTTP
    pub fn registry(mut self, registry: Arc<dyn RegistryApi>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use a custom gateway connector instead of WebSocket
    pub fn connector(mut self, connector: Arc<dyn GatewayConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn on_ready(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&InboundMessage) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Span that every background task of the bridge runs in
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Build the bridge and wire registry events to the gateway
    pub fn build(self) -> Arc<AircBridge> {
        let config = self.config;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(HttpRegistry::new(config.registry.url.clone())));
        let connector = self.connector.unwrap_or_else(|| Arc::new(WsConnector));

        let client = RegistryClient::new(&config.agent, registry);
        let span = self.span.unwrap_or_else(|| client.span().clone());
        let client = Arc::new(client.with_span(span.clone()));
        let link = Arc::new(Mutex::new(LinkState::default()));

        {
            let link = link.clone();
            let on_message = self.on_message.clone();
            client.on_message(move |msg| {
                let link = link.clone();
                let on_message = on_message.clone();
                async move {
                    forward(&link, &BridgeFrame::from(&msg));
                    if let Some(callback) = &on_message {
                        callback(&msg);
                    }
                }
            });
        }

        if config.gateway.auto_accept_consent {
            // accept on a separate task; polling never waits on POST /consent
            let weak = Arc::downgrade(&client);
            let task_span = span.clone();
            client.on_consent_request(move |req| {
                let weak = weak.clone();
                let task_span = task_span.clone();
                async move {
                    let Some(client) = weak.upgrade() else {
                        return;
                    };
                    tracing::info!(from = %req.from, "Auto-accepting consent request");
                    tokio::spawn(
                        async move {
                            client.accept_consent(&req.from).await;
                        }
                        .instrument(task_span),
                    );
                }
            });
        } else {
            let link = link.clone();
            client.on_consent_request(move |req| {
                let link = link.clone();
                async move {
                    forward(&link, &BridgeFrame::from(req));
                }
            });
        }

        Arc::new(AircBridge {
            policy: ReconnectPolicy::from_config(&config.gateway),
            config,
            client,
            connector,
            link,
            on_ready: self.on_ready,
            on_error: self.on_error,
            span,
        })
    }
}

/// Relay between the AIRC registry and the local gateway
pub struct AircBridge {
    config: AircConfig,
    client: Arc<RegistryClient>,
    connector: Arc<dyn GatewayConnector>,
    policy: ReconnectPolicy,
    link: Arc<Mutex<LinkState>>,
    on_ready: Option<ReadyCallback>,
    on_error: Option<ErrorCallback>,
    span: tracing::Span,
}

impl AircBridge {
    /// Build a bridge with HTTP registry, WebSocket gateway and no callbacks
    pub fn from_config(config: AircConfig) -> Arc<Self> {
        BridgeBuilder::new(config).build()
    }

    /// Register, open the gateway link, then start polling.
    ///
    /// Registration failure and the first gateway connect failure are both
    /// fatal. The link is open before the first poll, so no forwarded event
    /// can precede it.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if let Err(e) = self.client.register().await {
            self.report_error(&e);
            return Err(e);
        }

        {
            let mut state = self.link.lock();
            state.stopped = false;
            state.attempts = 0;
        }

        if let Err(e) = self.open().await {
            self.link.lock().status = ConnectionStatus::Closed;
            self.report_error(&e);
            return Err(e);
        }

        if let Err(e) = self
            .client
            .start(
                self.config.registry.poll_interval(),
                self.config.registry.heartbeat_interval(),
            )
            .await
        {
            self.report_error(&e);
            return Err(e);
        }

        tracing::info!(handle = %self.client.handle(), gateway = %self.config.gateway.url, "AIRC bridge ready");
        if let Some(callback) = &self.on_ready {
            callback();
        }
        Ok(())
    }

    /// Stop polling and close the gateway link
    pub async fn stop(&self) {
        self.client.stop().await;

        let mut state = self.link.lock();
        state.stopped = true;
        if let Some(task) = state.reconnect.take() {
            task.abort();
        }
        if let Some(task) = state.reader.take() {
            task.abort();
        }
        if state.outbound.take().is_some() {
            tracing::info!("Gateway link closed");
        }
        if state.status != ConnectionStatus::Absent {
            state.status = ConnectionStatus::Closed;
        }
    }

    /// Registry session connected and gateway link open
    pub async fn is_connected(&self) -> bool {
        self.client.is_connected().await && self.connection_status() == ConnectionStatus::Open
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.link.lock().status
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.link.lock().attempts
    }

    pub fn client(&self) -> &Arc<RegistryClient> {
        &self.client
    }

    pub async fn send(
        &self,
        to: &str,
        text: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<()> {
        self.client.send(to, text, payload).await
    }

    pub async fn get_presence(&self) -> Vec<PresenceRecord> {
        self.client.get_presence().await
    }

    // =========================================================================
    // Gateway link lifecycle
    // =========================================================================

    async fn open(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.link.lock();
            if state.stopped {
                return Ok(());
            }
            state.status = ConnectionStatus::Connecting;
        }
        let link = self.connector.connect(&self.config.gateway.url).await?;
        self.handle_open(link);
        Ok(())
    }

    fn handle_open(self: &Arc<Self>, link: GatewayLink) {
        let GatewayLink { outbound, events } = link;

        {
            let mut state = self.link.lock();
            if state.stopped {
                return;
            }
            state.attempts = 0;
            state.status = ConnectionStatus::Open;
            state.outbound = Some(outbound);
            let reader = tokio::spawn(
                run_link(Arc::downgrade(self), events).instrument(self.span.clone()),
            );
            if let Some(previous) = state.reader.replace(reader) {
                previous.abort();
            }
        }

        tracing::info!(url = %self.config.gateway.url, "Gateway link open");
        forward(&self.link, &BridgeFrame::register(self.client.handle()));
    }

    fn handle_close(self: &Arc<Self>) {
        let mut state = self.link.lock();
        state.outbound = None;
        state.reader = None;
        state.status = ConnectionStatus::Closed;
        if state.stopped {
            return;
        }

        if !self.policy.should_retry(state.attempts) {
            tracing::error!(
                attempts = state.attempts,
                "Gateway reconnect attempts exhausted, relay disconnected"
            );
            return;
        }

        state.attempts += 1;
        let attempt = state.attempts;
        let delay = self.policy.delay_for(attempt);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Gateway link closed, scheduling reconnect"
        );

        let bridge = Arc::downgrade(self);
        let task = tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                if let Some(bridge) = bridge.upgrade() {
                    bridge.reconnect().await;
                }
            }
            .instrument(self.span.clone()),
        );
        state.reconnect = Some(task);
    }

    async fn reconnect(self: &Arc<Self>) {
        if self.link.lock().stopped {
            return;
        }
        if let Err(e) = self.open().await {
            self.report_error(&e);
            self.handle_close();
        }
    }

    // =========================================================================
    // Gateway -> registry
    // =========================================================================

    /// Parse one gateway frame and run the command on its own task.
    ///
    /// The reader never awaits a registry call, so a stuck request cannot
    /// delay later frames or the close event.
    fn handle_frame(self: &Arc<Self>, frame: &str) {
        let command = match HostCommand::parse(frame) {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::debug!("Ignoring unrecognized gateway frame");
                return;
            }
            Err(e) => {
                tracing::warn!("Dropping malformed gateway frame: {}", e);
                return;
            }
        };

        let bridge = self.clone();
        tokio::spawn(
            async move { bridge.run_command(command).await }.instrument(self.span.clone()),
        );
    }

    async fn run_command(&self, command: HostCommand) {
        match command {
            HostCommand::Send { to, text, payload } => {
                if let Err(e) = self.client.send(&to, &text, payload).await {
                    tracing::warn!(to = %to, "Relay send failed: {}", e);
                }
            }
            HostCommand::AcceptConsent { handle } => {
                self.client.accept_consent(&handle).await;
            }
            HostCommand::Block { handle } => {
                self.client.block_agent(&handle).await;
            }
            HostCommand::Presence {} => {
                let agents = self.client.get_presence().await;
                forward(&self.link, &BridgeFrame::PresenceResponse { agents });
            }
            HostCommand::UpdateStatus { working_on } => {
                self.client.set_working_on(working_on).await;
            }
        }
    }

    fn report_error(&self, error: &Error) {
        tracing::warn!("AIRC bridge error: {}", error);
        if let Some(callback) = &self.on_error {
            callback(error);
        }
    }
}

async fn run_link(weak: Weak<AircBridge>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        let Some(bridge) = weak.upgrade() else {
            return;
        };
        match event {
            LinkEvent::Frame(frame) => bridge.handle_frame(&frame),
            LinkEvent::Error(e) => bridge.report_error(&Error::Gateway(e)),
            LinkEvent::Closed => {
                bridge.handle_close();
                return;
            }
        }
    }

    // sender dropped without a Closed event
    if let Some(bridge) = weak.upgrade() {
        bridge.handle_close();
    }
}
