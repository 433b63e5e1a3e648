use std::sync::Arc;

use bridge_adapter::{ClientEventHandler, ControlClient, ControlClientFactory, ControlError, MqttConfig};

use crate::client::RumqttControlClient;
use crate::options::{mqtt_options, ClientSettings};

/// Builds [`RumqttControlClient`]s for the adapter's connect loop.
#[derive(Debug, Clone, Default)]
pub struct RumqttClientFactory {
    settings: ClientSettings,
}

impl RumqttClientFactory {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }
}

impl ControlClientFactory for RumqttClientFactory {
    fn build(
        &self,
        config: &MqttConfig,
        handler: Arc<dyn ClientEventHandler>,
    ) -> Result<Arc<dyn ControlClient>, ControlError> {
        let options = mqtt_options(config)?;
        tracing::debug!("Building MQTT client {} for {}", config.client_id, config.broker_url());
        Ok(RumqttControlClient::new(options, handler, self.settings.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_adapter::{InboundMessage, QosLevel};

    struct NoopHandler;

    impl ClientEventHandler for NoopHandler {
        fn on_connect(&self, _client: &dyn ControlClient) {}
        fn on_connection_lost(&self, _error: &ControlError) {}
        fn on_message(&self, _message: InboundMessage) {}
    }

    #[tokio::test]
    async fn test_build_rejects_unknown_scheme() {
        let factory = RumqttClientFactory::default();
        let config = MqttConfig::new("broker.local", 1883).with_scheme("ws");
        let result = factory.build(&config, Arc::new(NoopHandler));
        assert!(matches!(result, Err(ControlError::UnsupportedScheme(_))));
    }

    #[tokio::test]
    async fn test_built_client_starts_disconnected() {
        let factory = RumqttClientFactory::default();
        let client = factory
            .build(&MqttConfig::new("broker.local", 1883), Arc::new(NoopHandler))
            .unwrap();
        assert!(!client.is_connected());
        // requests queue up until the event loop runs
        assert!(client.subscribe("/p2p/device_public/#", QosLevel::AtMostOnce).is_ok());
    }
}
