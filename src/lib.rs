//! AIRC Bridge - agent identity and relay client for the AIRC registry
//!
//! Registers an agent with an AIRC presence/messaging registry, keeps the
//! session alive with heartbeats, polls for inbound messages and handles
//! consent handshakes. The bridge relays all of it to a local gateway
//! process over a WebSocket channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      AIRC Registry                        │
//! │   /presence     /messages     /consent                    │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ HTTPS (bearer token)
//! ┌──────────────────────────▼───────────────────────────────┐
//! │                     RegistryClient                        │
//! │  - register / heartbeat / poll schedule                   │
//! │  - message vs. consent dispatch                           │
//! │  - send, presence, accept / block                         │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ handlers
//! ┌──────────────────────────▼───────────────────────────────┐
//! │                       AircBridge                          │
//! │  - airc:* frames <-> registry calls                       │
//! │  - auto-accept or forward consent requests                │
//! │  - exponential-backoff reconnect                          │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ WebSocket
//! ┌──────────────────────────▼───────────────────────────────┐
//! │                      Local Gateway                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: Registry wire types, HTTP API and session client
//! - [`gateway`]: Gateway frame protocol, connector and reconnect policy
//! - [`bridge`]: Relay between registry and gateway
//! - [`config`]: Configuration management

pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;
pub mod registry;

pub use bridge::{AircBridge, BridgeBuilder, ConnectionStatus};
pub use config::AircConfig;
pub use error::{Error, Result};
pub use registry::RegistryClient;
