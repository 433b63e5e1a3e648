//! Translation from [`MqttConfig`] to rumqttc options.

use std::time::Duration;

use bridge_adapter::{ControlError, MqttConfig, QosLevel};
use rumqttc::{MqttOptions, Transport};

/// Client behaviour not carried by the broker config.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Upper bound for the initial connect handshake
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Pause between reconnect attempts after the connection drops
    /// Default: 1 second
    pub reconnect_delay: Duration,

    /// Capacity of rumqttc's request channel
    /// Default: 64
    pub request_capacity: usize,

    /// QoS used for messages published to devices
    /// Default: QoS 0
    pub publish_qos: QosLevel,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            request_capacity: 64,
            publish_qos: QosLevel::AtMostOnce,
        }
    }
}

/// Map a config scheme onto a rumqttc transport.
///
/// `tcp`/`mqtt` select plain TCP; `ssl`/`tls`/`mqtts` select TLS with the
/// platform's root certificates.
pub fn transport_for_scheme(scheme: &str) -> Result<Transport, ControlError> {
    match scheme.to_ascii_lowercase().as_str() {
        "tcp" | "mqtt" => Ok(Transport::Tcp),
        "ssl" | "tls" | "mqtts" => Ok(Transport::tls_with_default_config()),
        other => Err(ControlError::UnsupportedScheme(other.to_string())),
    }
}

/// Build rumqttc options from a broker config.
pub fn mqtt_options(config: &MqttConfig) -> Result<MqttOptions, ControlError> {
    let transport = transport_for_scheme(&config.scheme)?;

    let mut options = MqttOptions::new(config.client_id.as_str(), config.broker.as_str(), config.port);
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(true);
    if !config.username.is_empty() {
        options.set_credentials(config.username.as_str(), config.password.as_str());
    }
    options.set_transport(transport);
    Ok(options)
}
