//! # mqtt-control
//!
//! rumqttc-backed implementation of the bridge adapter's control-plane seam.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bridge_adapter::{MqttConfig, MqttUdpAdapter};
//! use mqtt_control::RumqttClientFactory;
//!
//! let config = MqttConfig::new("broker.local", 8883).with_scheme("ssl");
//! let adapter = MqttUdpAdapter::builder(config, Arc::new(RumqttClientFactory::default()))
//!     .with_udp_server(udp_server)
//!     .build()?;
//! adapter.start()?;
//! ```

mod client;
mod factory;
mod options;

pub use client::RumqttControlClient;
pub use factory::RumqttClientFactory;
pub use options::{mqtt_options, transport_for_scheme, ClientSettings};
