//! Scripted in-memory gateway for tests

use super::connection::{GatewayConnector, GatewayLink, LinkEvent};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Gateway-side ends of one accepted link
pub(crate) struct HostSide {
    pub from_bridge: mpsc::UnboundedReceiver<String>,
    pub to_bridge: mpsc::UnboundedSender<LinkEvent>,
}

impl HostSide {
    /// Send a raw frame to the bridge
    pub fn send(&self, frame: &str) {
        let _ = self.to_bridge.send(LinkEvent::Frame(frame.to_string()));
    }

    pub fn close(&self) {
        let _ = self.to_bridge.send(LinkEvent::Closed);
    }

    /// Drain every frame the bridge has written so far
    pub fn drain(&mut self) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_bridge.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap_or(serde_json::Value::Null));
        }
        frames
    }
}

/// Connector whose outcomes are scripted per attempt.
///
/// Attempts beyond the script succeed when `accept_by_default` is set.
pub(crate) struct MockConnector {
    script: Mutex<VecDeque<bool>>,
    accept_by_default: bool,
    hosts: Mutex<VecDeque<HostSide>>,
    attempts: Mutex<Vec<Instant>>,
}

impl MockConnector {
    pub fn accepting() -> Self {
        Self::scripted(Vec::new(), true)
    }

    pub fn scripted(outcomes: Vec<bool>, accept_by_default: bool) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            accept_by_default,
            hosts: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Take the oldest accepted link not yet taken
    pub fn take_host(&self) -> HostSide {
        self.hosts
            .lock()
            .pop_front()
            .expect("no accepted gateway link")
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl GatewayConnector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<GatewayLink> {
        self.attempts.lock().push(Instant::now());
        let accept = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(self.accept_by_default);
        if !accept {
            return Err(Error::Gateway("connection refused".to_string()));
        }

        let (outbound, from_bridge) = mpsc::unbounded_channel();
        let (to_bridge, events) = mpsc::unbounded_channel();
        self.hosts.lock().push_back(HostSide {
            from_bridge,
            to_bridge,
        });
        Ok(GatewayLink { outbound, events })
    }
}
