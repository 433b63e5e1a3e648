//! Configuration types for the bridge-adapter crate
//!
//! Two structures live here: [`MqttConfig`], the broker connection parameters
//! that are swapped wholesale on a control-plane reload, and [`BridgeConfig`],
//! the adapter's own tuning knobs (topics, queue sizes, intervals).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::topic::TopicScheme;

/// Connection parameters for the control-plane broker.
///
/// Immutable once handed to a connect attempt; a reload replaces the whole
/// value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or IP address
    pub broker: String,

    /// URL scheme: `tcp`/`mqtt` or `ssl`/`tls`/`mqtts`
    /// Default: "tcp"
    #[serde(rename = "type", default = "default_scheme")]
    pub scheme: String,

    /// Broker port
    /// Default: 1883
    #[serde(default = "default_port")]
    pub port: u16,

    /// MQTT client identifier
    #[serde(default = "generate_client_id")]
    pub client_id: String,

    /// Username, empty for anonymous access
    #[serde(default)]
    pub username: String,

    /// Password, empty for anonymous access
    #[serde(default)]
    pub password: String,

    /// Keep-alive interval in seconds
    /// Default: 60
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_scheme() -> String {
    "tcp".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn generate_client_id() -> String {
    format!("mqtt-udp-bridge-{}", uuid::Uuid::new_v4())
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1".to_string(),
            scheme: default_scheme(),
            port: default_port(),
            client_id: generate_client_id(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("broker", &self.broker)
            .field("scheme", &self.scheme)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("keep_alive_secs", &self.keep_alive_secs)
            .finish()
    }
}

impl MqttConfig {
    /// Create a config for the given broker host and port with defaults elsewhere.
    pub fn new(broker: impl Into<String>, port: u16) -> Self {
        Self {
            broker: broker.into(),
            port,
            ..Default::default()
        }
    }

    /// `scheme://broker:port`, for logging.
    pub fn broker_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.broker, self.port)
    }

    /// Keep-alive as a duration.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.broker.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "Broker address must not be empty".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(BridgeError::Configuration(
                "Broker port must be greater than 0".to_string(),
            ));
        }

        if self.client_id.is_empty() {
            return Err(BridgeError::Configuration(
                "Client identifier must not be empty".to_string(),
            ));
        }

        if self.scheme.is_empty() {
            return Err(BridgeError::Configuration(
                "Broker scheme must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }
}

/// Configuration for the MqttUdpAdapter
///
/// Controls topics, buffer sizes and the timing of the background loops.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Topic filter subscribed on every connect
    /// Default: "/p2p/device_public/#"
    pub control_topic: String,

    /// Prefix of each device's publish topic; the raw address token is appended
    /// Default: "/p2p/device_sub/"
    pub publish_topic_prefix: String,

    /// Capacity of the inbound message queue
    /// Default: 10000
    pub queue_capacity: usize,

    /// Delay between failed connect attempts
    /// Default: 5 seconds
    pub retry_interval: Duration,

    /// Interval of the liveness sweep
    /// Default: 30 seconds
    pub sweep_interval: Duration,

    /// Time allowed for a clean broker disconnect
    /// Default: 250 milliseconds
    pub disconnect_grace: Duration,

    /// How long a session stays active on control-plane traffic alone
    /// Default: 120 seconds
    pub session_idle_timeout: Duration,

    /// Capacity of each session's inbound command buffer
    /// Default: 256
    pub inbound_command_buffer: usize,

    /// Where the address token lives in a topic
    pub topic_scheme: TopicScheme,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            control_topic: "/p2p/device_public/#".to_string(),
            publish_topic_prefix: "/p2p/device_sub/".to_string(),
            queue_capacity: 10_000,
            retry_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
            disconnect_grace: Duration::from_millis(250),
            session_idle_timeout: Duration::from_secs(120),
            inbound_command_buffer: 256,
            topic_scheme: TopicScheme::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a new BridgeConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a BridgeConfig that reconnects and sweeps aggressively
    pub fn fast_reconnect() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(10),
            session_idle_timeout: Duration::from_secs(30),
            ..Default::default()
        }
    }

    /// Create a BridgeConfig optimized for resource efficiency
    pub fn resource_efficient() -> Self {
        Self {
            queue_capacity: 1_000,
            inbound_command_buffer: 32,
            sweep_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.control_topic.is_empty() {
            return Err(BridgeError::Configuration(
                "Control topic must not be empty".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(BridgeError::Configuration(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.inbound_command_buffer == 0 {
            return Err(BridgeError::Configuration(
                "Inbound command buffer must be greater than 0".to_string(),
            ));
        }

        if self.retry_interval == Duration::ZERO {
            return Err(BridgeError::Configuration(
                "Retry interval must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval == Duration::ZERO {
            return Err(BridgeError::Configuration(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        self.topic_scheme.validate()
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_control_topic(mut self, topic: impl Into<String>) -> Self {
        self.control_topic = topic.into();
        self
    }

    pub fn with_publish_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.publish_topic_prefix = prefix.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    pub fn with_inbound_command_buffer(mut self, size: usize) -> Self {
        self.inbound_command_buffer = size;
        self
    }

    pub fn with_topic_scheme(mut self, scheme: TopicScheme) -> Self {
        self.topic_scheme = scheme;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.control_topic, "/p2p/device_public/#");
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = BridgeConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = BridgeConfig {
            retry_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid.validate().is_err());

        let invalid = BridgeConfig::default().with_topic_scheme(TopicScheme {
            segment_count: 2,
            address_index: 3,
            ..Default::default()
        });
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_config_presets() {
        let fast = BridgeConfig::fast_reconnect();
        assert_eq!(fast.retry_interval, Duration::from_secs(1));
        assert!(fast.validate().is_ok());

        let efficient = BridgeConfig::resource_efficient();
        assert_eq!(efficient.queue_capacity, 1_000);
        assert!(efficient.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = BridgeConfig::new()
            .with_control_topic("/devices/up/#")
            .with_publish_topic_prefix("/devices/down/")
            .with_queue_capacity(16)
            .with_retry_interval(Duration::from_secs(2))
            .with_sweep_interval(Duration::from_secs(3))
            .with_inbound_command_buffer(4);

        assert_eq!(config.control_topic, "/devices/up/#");
        assert_eq!(config.publish_topic_prefix, "/devices/down/");
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.inbound_command_buffer, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mqtt_config_from_json() {
        let config: MqttConfig = serde_json::from_str(
            r#"{"broker":"mqtt.example.com","type":"ssl","port":8883,"client_id":"bridge-1","username":"u","password":"p"}"#,
        )
        .unwrap();
        assert_eq!(config.scheme, "ssl");
        assert_eq!(config.broker_url(), "ssl://mqtt.example.com:8883");
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert!(config.validate().is_ok());

        let minimal: MqttConfig = serde_json::from_str(r#"{"broker":"localhost"}"#).unwrap();
        assert_eq!(minimal.scheme, "tcp");
        assert_eq!(minimal.port, 1883);
        assert!(minimal.client_id.starts_with("mqtt-udp-bridge-"));
    }

    #[test]
    fn test_mqtt_config_validation() {
        assert!(MqttConfig::new("", 1883).validate().is_err());
        assert!(MqttConfig::new("localhost", 0).validate().is_err());
        assert!(MqttConfig::new("localhost", 1883)
            .with_client_id("")
            .validate()
            .is_err());
        assert!(MqttConfig::new("localhost", 1883).validate().is_ok());
    }

    #[test]
    fn test_mqtt_config_debug_redacts_password() {
        let config = MqttConfig::new("localhost", 1883).with_credentials("device", "hunter2");
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("device"));
        assert!(!rendered.contains("hunter2"));
    }
}
