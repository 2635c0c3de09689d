//! AIRC bridge configuration management

use crate::error::{Error, Result};
use crate::registry::normalize_handle;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default public registry endpoint
pub const DEFAULT_REGISTRY_URL: &str = "https://airc.chat/api";

/// Default local gateway endpoint
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

/// Main AIRC bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AircConfig {
    /// Agent identity
    #[serde(default)]
    pub agent: AgentConfig,

    /// Registry connection
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Local gateway relay
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Agent identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Unique handle on the registry
    pub handle: String,

    /// Status line announced with every heartbeat
    pub working_on: String,

    /// Whether this identity is an autonomous agent
    pub is_agent: bool,

    /// Human operator responsible for the agent
    pub operator: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            handle: String::new(),
            working_on: "Available".to_string(),
            is_agent: true,
            operator: None,
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry base URL
    pub url: String,

    /// Inbound message poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Presence heartbeat interval in milliseconds
    pub heartbeat_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REGISTRY_URL.to_string(),
            poll_interval_ms: 3_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

impl RegistryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// Local gateway (host channel) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway WebSocket URL
    pub url: String,

    /// Accept every consent request without asking the host
    pub auto_accept_consent: bool,

    /// Reconnect attempts before the relay gives up
    pub max_reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds (doubled per attempt)
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for a single reconnect delay in milliseconds
    pub reconnect_max_delay_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            auto_accept_consent: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl AircConfig {
    /// Create a configuration for `handle` with every other field defaulted
    pub fn for_handle(handle: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.agent.handle = handle.into();
        config
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Check the configuration and normalize the handle in place
    pub fn validate(&mut self) -> Result<()> {
        let handle = normalize_handle(self.agent.handle.trim()).to_string();
        if handle.is_empty() {
            return Err(Error::Config("agent.handle is required".to_string()));
        }
        if handle.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "agent.handle must not contain whitespace: '{}'",
                handle
            )));
        }
        self.agent.handle = handle;

        if self.registry.poll_interval_ms == 0 || self.registry.heartbeat_interval_ms == 0 {
            return Err(Error::Config(
                "registry intervals must be greater than zero".to_string(),
            ));
        }

        check_scheme(&self.registry.url, &["http://", "https://"], "registry.url")?;
        check_scheme(&self.gateway.url, &["ws://", "wss://"], "gateway.url")?;

        if self.gateway.reconnect_max_delay_ms < self.gateway.reconnect_base_delay_ms {
            return Err(Error::Config(
                "gateway.reconnect_max_delay_ms must not be below the base delay".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_scheme(url: &str, schemes: &[&str], field: &str) -> Result<()> {
    if schemes.iter().any(|s| url.starts_with(s)) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must start with one of {:?}: '{}'",
            field, schemes, url
        )))
    }
}
