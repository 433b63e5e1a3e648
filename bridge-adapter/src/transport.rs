//! Seams to the two transports the adapter bridges.
//!
//! The adapter never talks MQTT or UDP itself. It drives a control-plane
//! client built by a [`ControlClientFactory`] and a [`DataPlaneTransport`]
//! supplied by the application; both can be replaced at runtime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::MqttConfig;
use crate::error::{ControlError, TransportError};
use crate::types::{DeviceId, InboundMessage, QosLevel};

/// A control-plane (MQTT) client instance.
///
/// One instance corresponds to one connection attempt; the connection manager
/// builds a fresh instance for every retry.
#[async_trait]
pub trait ControlClient: Send + Sync {
    /// Connect to the broker, resolving once the broker accepted the session.
    ///
    /// Implementations invoke [`ClientEventHandler::on_connect`] on success and
    /// again after every internal reconnect.
    async fn connect(&self) -> Result<(), ControlError>;

    /// Whether the client currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// Subscribe to a topic filter. Must not block.
    fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), ControlError>;

    /// Publish a payload to a topic.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ControlError>;

    /// Disconnect, waiting at most `grace` for the broker to acknowledge.
    async fn disconnect(&self, grace: Duration);
}

/// Callbacks a control-plane client delivers into the adapter.
///
/// All methods run on the client's own execution context and must return
/// promptly.
pub trait ClientEventHandler: Send + Sync {
    /// The client (re)connected; subscriptions must be re-established here.
    fn on_connect(&self, client: &dyn ControlClient);

    /// The connection dropped. Recovery is up to the client or the connect loop.
    fn on_connection_lost(&self, error: &ControlError);

    /// A message arrived on a subscribed topic.
    fn on_message(&self, message: InboundMessage);
}

/// Builds control-plane clients from configuration.
pub trait ControlClientFactory: Send + Sync {
    /// Build an unconnected client wired to `handler`.
    fn build(
        &self,
        config: &MqttConfig,
        handler: Arc<dyn ClientEventHandler>,
    ) -> Result<Arc<dyn ControlClient>, ControlError>;
}

/// A per-device session allocated by the data-plane transport.
pub trait DataSession: Send + Sync {
    /// Transport-level connection identifier.
    fn conn_id(&self) -> &str;

    /// Hex-encoded AES key and full nonce for the device's audio stream.
    fn key_and_nonce(&self) -> (String, String);

    /// Whether datagrams have been seen recently.
    fn is_active(&self) -> bool;
}

/// The data-plane (UDP) transport.
#[async_trait]
pub trait DataPlaneTransport: Send + Sync {
    /// Allocate a session for a device.
    fn create_session(
        &self,
        device_id: &DeviceId,
        label: &str,
    ) -> Result<Arc<dyn DataSession>, TransportError>;

    /// Release a session by connection identifier. Unknown ids are ignored.
    fn close_session(&self, conn_id: &str);

    /// Shut the transport down.
    async fn close(&self) -> Result<(), TransportError>;
}
