//! # MQTT/UDP bridge adapter
//!
//! Bridges two independently failing transports used by embedded voice
//! devices: an MQTT control plane for signaling and a UDP data plane for
//! encrypted audio. The adapter keeps one session per device across both,
//! creating it on the device's first control message, sweeping it when it goes
//! idle and tearing it down when either transport is replaced.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bridge_adapter::prelude::*;
//!
//! let adapter = MqttUdpAdapter::builder(MqttConfig::new("broker.local", 1883), factory)
//!     .with_udp_server(udp_server)
//!     .with_on_new_connection(|session: Arc<DeviceSession>| {
//!         let mut commands = session.take_inbound().expect("fresh session");
//!         tokio::spawn(async move {
//!             while let Some(payload) = commands.recv().await {
//!                 // handle hello/listen/goodbye ...
//!             }
//!         });
//!     })
//!     .build()?;
//!
//! adapter.start()?;
//! ```
//!
//! ## Architecture
//!
//! 1. **Connect loop**: builds a client through the [`ControlClientFactory`],
//!    retries every `retry_interval` until connected, subscribes on every connect
//! 2. **Inbound queue**: bounded and lossy, so the client's delivery callback
//!    never blocks
//! 3. **Dispatcher**: one consumer, strict arrival order, creates sessions on
//!    first contact and forwards payloads
//! 4. **Liveness sweeper**: evicts sessions whose activity predicate is false
//! 5. **Reload**: either transport can be swapped; all sessions are destroyed
//!    first

pub mod adapter;
pub mod config;
mod connection;
mod dispatcher;
pub mod error;
mod handles;
pub mod logging;
pub mod queue;
pub mod registry;
pub mod session;
pub mod stats;
mod sweeper;
pub mod topic;
pub mod transport;
pub mod types;

pub use adapter::{AdapterBuilder, MqttUdpAdapter};
pub use config::{BridgeConfig, MqttConfig};
pub use dispatcher::NewConnectionHandler;
pub use error::{BridgeError, ControlError, Result, SessionError, TransportError};
pub use session::{DeviceSession, AES_KEY, FULL_NONCE};
pub use stats::StatsSnapshot;
pub use topic::{device_id_from_topic, parse_topic, TopicAddress, TopicScheme};
pub use transport::{
    ClientEventHandler, ControlClient, ControlClientFactory, DataPlaneTransport, DataSession,
};
pub use types::{AdapterState, DeviceId, InboundMessage, MessageEnvelope, QosLevel};

/// Prelude module for convenient imports
///
/// ```rust
/// use bridge_adapter::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AdapterState, BridgeConfig, BridgeError, ControlClientFactory, DataPlaneTransport,
        DataSession, DeviceId, DeviceSession, MqttConfig, MqttUdpAdapter, NewConnectionHandler,
        Result,
    };
}
