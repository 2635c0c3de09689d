//! Gateway link abstraction

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Event delivered by an open gateway link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame from the gateway
    Frame(String),
    /// Transport error; a `Closed` event follows if the link dies
    Error(String),
    /// The link is gone
    Closed,
}

/// An open duplex link to the gateway
///
/// Frames pushed into `outbound` are written in order. Dropping `outbound`
/// closes the link.
pub struct GatewayLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links to the local gateway
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<GatewayLink>;
}
