//! Error types for the bridge-adapter crate.

use std::time::Duration;

use crate::types::DeviceId;

/// Errors returned by the public adapter API.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The adapter was started twice
    #[error("Adapter already started")]
    AlreadyStarted,

    /// The adapter has been stopped and accepts no further work
    #[error("Adapter stopped")]
    Stopped,

    /// Background work was requested outside of a Tokio runtime
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Errors from the control-plane (MQTT) client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControlError {
    /// Failed to establish a connection with the broker
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    /// Connection attempt did not complete in time
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// An established connection was lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to subscribe to a topic
    #[error("Failed to subscribe to {topic}: {reason}")]
    Subscribe {
        /// The topic filter
        topic: String,
        /// Underlying reason
        reason: String,
    },

    /// Failed to publish a message
    #[error("Failed to publish to {topic}: {reason}")]
    Publish {
        /// The destination topic
        topic: String,
        /// Underlying reason
        reason: String,
    },

    /// Broker URL scheme is not supported by the client
    #[error("Unsupported broker scheme: {0}")]
    UnsupportedScheme(String),

    /// The client has no live connection
    #[error("Client not connected")]
    NotConnected,

    /// `connect` was called on a client whose connection was already consumed
    #[error("Client already connected or disconnected")]
    AlreadyConsumed,
}

/// Errors from the data-plane (UDP) transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The transport could not allocate a session for the device
    #[error("Failed to create data-plane session for {device_id}: {reason}")]
    SessionCreation {
        /// Device the session was requested for
        device_id: DeviceId,
        /// Underlying reason
        reason: String,
    },

    /// The transport failed to shut down cleanly
    #[error("Failed to close transport: {0}")]
    Close(String),
}

/// Errors from a device session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// The session has been destroyed
    #[error("Session for {0} is closed")]
    Closed(DeviceId),

    /// The inbound command buffer is full
    #[error("Inbound command buffer full for {0}")]
    InboundFull(DeviceId),

    /// Publishing to the device's topic failed
    #[error("Publish failed: {0}")]
    Publish(#[from] ControlError),
}

/// Reasons the dispatcher skipped an inbound message.
///
/// None of these are fatal; the dispatcher logs them and moves on.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DispatchError {
    #[error("Failed to decode message envelope on {topic}: {source}")]
    Envelope {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No device identifier in topic: {0}")]
    UnresolvedTopic(String),

    #[error("Data-plane transport unavailable, device_id: {0}")]
    TransportUnavailable(DeviceId),

    #[error("Control-plane client unavailable, device_id: {0}")]
    ClientUnavailable(DeviceId),

    #[error("Adapter stopping, no session created for {0}")]
    Stopped(DeviceId),

    #[error(transparent)]
    SessionCreation(#[from] TransportError),

    #[error("Failed to forward message to session: {0}")]
    Forward(#[from] SessionError),
}

/// Convenience type alias for Results using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
