//! Local gateway (host channel)
//!
//! Frame protocol, connector abstraction and reconnect policy for the
//! duplex link between the bridge and the local gateway process.

mod backoff;
mod connection;
#[cfg(test)]
pub(crate) mod mock;
mod protocol;
mod ws;

pub use backoff::ReconnectPolicy;
pub use connection::{GatewayConnector, GatewayLink, LinkEvent};
pub use protocol::{BridgeFrame, HostCommand, CHANNEL_NAME};
pub use ws::WsConnector;
