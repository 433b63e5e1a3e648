//! Core types for the bridge-adapter crate.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Canonical, colon-separated identifier of a device (its MAC address).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a new device ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the device ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A raw message delivered by the control-plane client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Opaque payload bytes
    pub payload: Bytes,
}

impl InboundMessage {
    /// Create a new inbound message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// MQTT quality-of-service levels.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum QosLevel {
    /// QoS 0, fire and forget
    #[default]
    AtMostOnce,
    /// QoS 1
    AtLeastOnce,
    /// QoS 2
    ExactlyOnce,
}

/// Minimal framing every device message must satisfy.
///
/// Only a successful parse as a JSON object is required; the payload itself is
/// forwarded to the session untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Message type tag (`hello`, `listen`, `goodbye`, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Session identifier chosen by the device, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Everything else, kept opaque
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MessageEnvelope {
    /// Decode an envelope from raw payload bytes.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Lifecycle of an adapter instance.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum AdapterState {
    /// Built but not started
    Created,
    /// A connection loop is (re)connecting to the broker
    Connecting,
    /// The control-plane client is connected
    Connected,
    /// A transport reload is in progress
    Reloading,
    /// Terminal; no further connects are attempted
    Stopped,
}

impl AdapterState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdapterState::Stopped)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AdapterState::Created => "created",
            AdapterState::Connecting => "connecting",
            AdapterState::Connected => "connected",
            AdapterState::Reloading => "reloading",
            AdapterState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
