//! Gateway frame protocol
//!
//! JSON frames exchanged with the local gateway, tagged by `type`.
//!
//! Emitted by the bridge: `channel:register`, `airc:message`,
//! `airc:consent_request`, `airc:presence_response`.
//!
//! Consumed by the bridge: `airc:send`, `airc:accept_consent`, `airc:block`,
//! `airc:presence`, `airc:update_status`.

use crate::error::Result;
use crate::registry::{ConsentRequest, InboundMessage, PresenceRecord};
use serde::{Deserialize, Serialize};

/// Channel name announced in `channel:register`
pub const CHANNEL_NAME: &str = "airc";

// =============================================================================
// Bridge -> gateway
// =============================================================================

/// Frame sent from the bridge to the gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum BridgeFrame {
    #[serde(rename = "channel:register")]
    ChannelRegister { channel: String, handle: String },

    #[serde(rename = "airc:message")]
    Message {
        from: String,
        text: String,
        payload: Option<serde_json::Value>,
        timestamp: String,
        #[serde(rename = "messageId")]
        message_id: String,
    },

    #[serde(rename = "airc:consent_request")]
    ConsentRequest {
        from: String,
        message: Option<String>,
        timestamp: String,
    },

    #[serde(rename = "airc:presence_response")]
    PresenceResponse { agents: Vec<PresenceRecord> },
}

impl BridgeFrame {
    pub fn register(handle: &str) -> Self {
        BridgeFrame::ChannelRegister {
            channel: CHANNEL_NAME.to_string(),
            handle: handle.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&InboundMessage> for BridgeFrame {
    fn from(msg: &InboundMessage) -> Self {
        BridgeFrame::Message {
            from: msg.from.clone(),
            text: msg.text.clone(),
            payload: msg.payload.as_ref().map(|p| p.to_value()),
            timestamp: msg.timestamp.clone(),
            message_id: msg.id.clone(),
        }
    }
}

impl From<ConsentRequest> for BridgeFrame {
    fn from(req: ConsentRequest) -> Self {
        BridgeFrame::ConsentRequest {
            from: req.from,
            message: req.message,
            timestamp: req.timestamp,
        }
    }
}

// =============================================================================
// Gateway -> bridge
// =============================================================================

/// Command received from the gateway
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum HostCommand {
    #[serde(rename = "airc:send")]
    Send {
        to: String,
        text: String,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },

    #[serde(rename = "airc:accept_consent")]
    AcceptConsent { handle: String },

    #[serde(rename = "airc:block")]
    Block { handle: String },

    #[serde(rename = "airc:presence")]
    Presence {},

    #[serde(rename = "airc:update_status")]
    UpdateStatus {
        #[serde(rename = "workingOn")]
        working_on: String,
    },
}

const COMMAND_TYPES: &[&str] = &[
    "airc:send",
    "airc:accept_consent",
    "airc:block",
    "airc:presence",
    "airc:update_status",
];

impl HostCommand {
    /// Parse a gateway frame.
    ///
    /// `Ok(None)` means well-formed JSON with a `type` this bridge does not
    /// handle; `Err` means the frame is malformed.
    pub fn parse(frame: &str) -> Result<Option<Self>> {
        let value: serde_json::Value = serde_json::from_str(frame)?;
        let known = value
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| COMMAND_TYPES.contains(&t));
        if !known {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}
