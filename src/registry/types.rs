//! Registry wire types
//!
//! Shapes exchanged with the AIRC registry HTTP API. Field names follow the
//! registry's camelCase JSON.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Strip a single leading `@` from a handle
pub fn normalize_handle(handle: &str) -> &str {
    handle.strip_prefix('@').unwrap_or(handle)
}

// =============================================================================
// Inbound messages
// =============================================================================

/// Message type tag as reported by the registry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageKind {
    /// Plain text message
    #[default]
    Text,
    /// First-contact consent request
    ConsentRequest,
    /// Handshake message, treated as a consent request
    Handshake,
    /// Any tag this client does not know
    Other(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Text => "text",
            MessageKind::ConsentRequest => "consent_request",
            MessageKind::Handshake => "handshake",
            MessageKind::Other(tag) => tag,
        }
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        match tag {
            "text" => MessageKind::Text,
            "consent_request" => MessageKind::ConsentRequest,
            "handshake" => MessageKind::Handshake,
            other => MessageKind::Other(other.to_string()),
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(MessageKind::from(tag.as_str()))
    }
}

/// Structured data attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// A payload whose `type` tag this client recognizes
    Typed(TypedPayload),
    /// Anything else, carried through untouched
    Opaque(serde_json::Value),
}

/// Recognized payload shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypedPayload {
    /// Consent handshake carried inside a payload
    Handshake {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Payload {
    pub fn is_handshake(&self) -> bool {
        matches!(self, Payload::Typed(TypedPayload::Handshake { .. }))
    }

    /// Raw JSON form, as forwarded to the host channel
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Accept a JSON string or number as a string; `null` becomes empty
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

/// A message fetched from the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub timestamp: String,
    /// Carried through, never verified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl InboundMessage {
    /// Whether this item is part of the consent handshake
    pub fn is_consent_request(&self) -> bool {
        match self.kind {
            MessageKind::ConsentRequest | MessageKind::Handshake => true,
            MessageKind::Text | MessageKind::Other(_) => {
                self.payload.as_ref().is_some_and(Payload::is_handshake)
            }
        }
    }

    /// Return the message with `from` and `to` normalized
    pub fn normalized(mut self) -> Self {
        self.from = normalize_handle(&self.from).to_string();
        self.to = normalize_handle(&self.to).to_string();
        self
    }
}

/// Consent request derived from a handshake message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub from: String,
    pub message: Option<String>,
    pub timestamp: String,
}

impl From<InboundMessage> for ConsentRequest {
    fn from(msg: InboundMessage) -> Self {
        let payload_message = match msg.payload {
            Some(Payload::Typed(TypedPayload::Handshake { message })) => message,
            _ => None,
        };
        let message = if msg.text.is_empty() {
            payload_message
        } else {
            Some(msg.text)
        };
        Self {
            from: normalize_handle(&msg.from).to_string(),
            message,
            timestamp: msg.timestamp,
        }
    }
}

// =============================================================================
// Presence
// =============================================================================

/// Snapshot of one active agent, as returned by `GET /presence`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_agent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PresenceList {
    #[serde(default)]
    pub active: Vec<PresenceRecord>,
}

/// Presence action sent to `POST /presence`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Register,
    Heartbeat,
}

/// Body of `POST /presence`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub action: PresenceAction,
    pub username: String,
    pub working_on: String,
    pub status: String,
    pub is_agent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub client: String,
}

/// Reply to a registration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: bool,
    pub token: Option<String>,
    pub session_id: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Credentials issued by a successful registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub token: String,
    pub session_id: Option<String>,
}

// =============================================================================
// Outbound messages and consent
// =============================================================================

/// Raw `GET /messages` reply; items are decoded one by one
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessageBatch {
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

impl MessageBatch {
    /// Decode every item, skipping the ones that do not parse
    pub fn into_messages(self) -> Vec<InboundMessage> {
        self.messages
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<InboundMessage>(item) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!("Skipping malformed registry message: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// Body of `POST /messages`
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Generic `{success, message|error}` acknowledgement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ack {
    pub success: Option<bool>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl Ack {
    /// Anything without an explicit `success: false` counts as accepted
    pub fn is_accepted(&self) -> bool {
        self.success != Some(false)
    }

    pub fn reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "request rejected".to_string())
    }
}

/// Consent decision action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentAction {
    Accept,
    Block,
}

/// Body of `POST /consent`
#[derive(Debug, Clone, Serialize)]
pub struct ConsentDecision {
    pub action: ConsentAction,
    /// Counterpart the decision is about
    pub from: String,
    /// Handle of the deciding agent
    pub handle: String,
}
