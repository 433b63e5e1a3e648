//! Control-plane connection management.
//!
//! The connect loop builds a fresh client from the current broker config,
//! installs it as the current handle and tries to connect, retrying on a fixed
//! interval until it succeeds or its token is cancelled. Subscriptions are
//! (re)established by [`ControlHandler::on_connect`], which the client invokes
//! on every connect including its own internal reconnects.

use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::adapter::Shared;
use crate::error::ControlError;
use crate::stats::AdapterStats;
use crate::sweeper;
use crate::transport::{ClientEventHandler, ControlClient};
use crate::types::{AdapterState, InboundMessage, QosLevel};

/// Event handler wired into every client the connect loop builds.
pub(crate) struct ControlHandler {
    shared: Weak<Shared>,
    generation: u64,
}

impl ControlHandler {
    pub(crate) fn new(shared: Weak<Shared>, generation: u64) -> Self {
        Self { shared, generation }
    }
}

impl ClientEventHandler for ControlHandler {
    fn on_connect(&self, client: &dyn ControlClient) {
        let Some(shared) = self.shared.upgrade() else { return };

        let topic = &shared.config.control_topic;
        match client.subscribe(topic, QosLevel::AtMostOnce) {
            Ok(()) => tracing::info!("Subscribed to control topic: {}", topic),
            Err(e) => tracing::error!("Failed to subscribe to {}: {}", topic, e),
        }

        if shared.handles.is_current(self.generation) {
            shared.set_state(AdapterState::Connected);
        }
    }

    fn on_connection_lost(&self, error: &ControlError) {
        let Some(shared) = self.shared.upgrade() else { return };
        tracing::warn!("MQTT connection lost: {}", error);

        if shared.handles.is_current(self.generation) {
            shared.set_state(AdapterState::Connecting);
        }
    }

    fn on_message(&self, message: InboundMessage) {
        let Some(shared) = self.shared.upgrade() else { return };
        if !shared.handles.is_current(self.generation) {
            tracing::debug!(
                "Dropping delivery from superseded client, topic: {}",
                message.topic
            );
            return;
        }
        if shared.queue.offer(message) {
            AdapterStats::incr(&shared.stats.messages_enqueued);
        } else {
            AdapterStats::incr(&shared.stats.messages_dropped);
        }
    }
}

/// Build and connect a control-plane client, retrying until connected or
/// cancelled. Starts the liveness sweeper after the first success.
pub(crate) async fn run_connect_loop(shared: Arc<Shared>, token: CancellationToken) {
    let retry_interval = shared.config.retry_interval;
    let mut retry_count: u32 = 0;

    loop {
        let Some(generation) = shared.handles.reserve_generation(&token) else {
            tracing::debug!("Connect loop cancelled");
            return;
        };
        let config = shared.handles.mqtt_config();
        let handler = Arc::new(ControlHandler::new(Arc::downgrade(&shared), generation));

        let attempt = match shared.factory.build(&config, handler) {
            Ok(client) => {
                if !shared.handles.install_client(Arc::clone(&client), generation) {
                    if token.is_cancelled() {
                        tracing::debug!("Connect loop superseded, generation: {}", generation);
                        return;
                    }
                    // a reload bumped the generation but has not cancelled us yet
                    tracing::debug!("Client generation {} outdated, rebuilding", generation);
                    continue;
                }
                shared.update_sessions_client(&client);

                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Connect loop cancelled while connecting");
                        return;
                    }
                    result = client.connect() => result,
                }
            }
            Err(e) => Err(e),
        };

        match attempt {
            Ok(()) => {
                tracing::info!(
                    "Connected to MQTT broker {} after {} retries",
                    config.broker_url(),
                    retry_count
                );
                if shared.handles.is_current(generation) {
                    shared.set_state(AdapterState::Connected);
                }
                break;
            }
            Err(e) => {
                retry_count += 1;
                tracing::error!(
                    "Failed to connect to MQTT broker {}: {}, retrying in {:?} (attempt {})",
                    config.broker_url(),
                    e,
                    retry_interval,
                    retry_count
                );
            }
        }

        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Connect loop cancelled during backoff");
                return;
            }
            _ = tokio::time::sleep(retry_interval) => {}
        }
    }

    sweeper::ensure_started(&shared);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::adapter::test_support::{shared_with_factory, StubFactory};
    use crate::config::{BridgeConfig, MqttConfig};
    use crate::transport::ControlClientFactory;

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_connected() {
        let factory = Arc::new(StubFactory::default());
        factory.failures_before_connect.store(2, Ordering::SeqCst);
        let shared = shared_with_factory(BridgeConfig::default(), factory.clone());

        let token = CancellationToken::new();
        let task = tokio::spawn(run_connect_loop(Arc::clone(&shared), token.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.built.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(factory.built.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        task.await.unwrap();
        assert_eq!(factory.built.load(Ordering::SeqCst), 3);
        assert_eq!(shared.state(), AdapterState::Connected);
        assert!(shared.handles.client().is_some());
        assert!(shared.sweeper_started.load(Ordering::SeqCst));
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retrying() {
        let factory = Arc::new(StubFactory::default());
        factory.failures_before_connect.store(u32::MAX, Ordering::SeqCst);
        let shared = shared_with_factory(BridgeConfig::default(), factory.clone());

        let token = CancellationToken::new();
        let task = tokio::spawn(run_connect_loop(Arc::clone(&shared), token.clone()));
        tokio::time::sleep(Duration::from_secs(6)).await;
        token.cancel();
        task.await.unwrap();

        let built = factory.built.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(factory.built.load(Ordering::SeqCst), built);
        assert!(!shared.sweeper_started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_on_connect_subscribes_control_topic() {
        let factory = Arc::new(StubFactory::default());
        let shared = shared_with_factory(BridgeConfig::default(), factory.clone());

        run_connect_loop(Arc::clone(&shared), CancellationToken::new()).await;
        let client = factory.last_client().unwrap();
        assert_eq!(
            client.subscriptions.lock().as_slice(),
            &[("/p2p/device_public/#".to_string(), QosLevel::AtMostOnce)]
        );
        shared.lifetime.cancel();
    }

    #[test]
    fn test_stale_handler_does_not_change_state() {
        let factory = Arc::new(StubFactory::default());
        let shared = shared_with_factory(BridgeConfig::default(), factory);
        shared.set_state(AdapterState::Connecting);

        let stale = ControlHandler::new(Arc::downgrade(&shared), shared.handles.next_generation());
        shared.handles.next_generation();
        stale.on_connection_lost(&ControlError::ConnectionLost("reset".to_string()));
        assert_eq!(shared.state(), AdapterState::Connecting);
    }

    /// Bumps the client generation during its first build, the way a reload
    /// racing with the connect loop does.
    struct RacingFactory {
        inner: StubFactory,
        shared: Mutex<Weak<Shared>>,
        raced: AtomicBool,
    }

    impl ControlClientFactory for RacingFactory {
        fn build(
            &self,
            config: &MqttConfig,
            handler: Arc<dyn ClientEventHandler>,
        ) -> Result<Arc<dyn ControlClient>, ControlError> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                if let Some(shared) = self.shared.lock().upgrade() {
                    shared.handles.next_generation();
                }
            }
            self.inner.build(config, handler)
        }
    }

    #[tokio::test]
    async fn test_outdated_generation_rebuilds_while_not_cancelled() {
        let factory = Arc::new(RacingFactory {
            inner: StubFactory::default(),
            shared: Mutex::new(Weak::new()),
            raced: AtomicBool::new(false),
        });
        let shared = Arc::new(Shared::new(
            BridgeConfig::default(),
            MqttConfig::new("localhost", 1883),
            None,
            factory.clone(),
            None,
        ));
        *factory.shared.lock() = Arc::downgrade(&shared);

        run_connect_loop(Arc::clone(&shared), CancellationToken::new()).await;

        assert_eq!(factory.inner.built.load(Ordering::SeqCst), 2);
        assert_eq!(shared.state(), AdapterState::Connected);
        assert!(shared.handles.client().is_some());
        shared.lifetime.cancel();
    }

    #[tokio::test]
    async fn test_cancelled_loop_reserves_no_generation() {
        let factory = Arc::new(StubFactory::default());
        let shared = shared_with_factory(BridgeConfig::default(), factory.clone());
        let replacement = shared.handles.next_generation();

        let token = CancellationToken::new();
        token.cancel();
        run_connect_loop(Arc::clone(&shared), token).await;

        assert_eq!(factory.built.load(Ordering::SeqCst), 0);
        assert!(shared.handles.is_current(replacement));
    }

    #[test]
    fn test_superseded_client_deliveries_are_dropped() {
        let factory = Arc::new(StubFactory::default());
        let shared = shared_with_factory(BridgeConfig::default(), factory);
        let stale = ControlHandler::new(Arc::downgrade(&shared), shared.handles.next_generation());
        shared.handles.swap_mqtt_config(MqttConfig::new("new-broker", 1883));

        stale.on_message(InboundMessage::new("/p2p/device_public/aa_bb", "{}"));

        let stats = shared.stats.snapshot();
        assert_eq!(stats.messages_enqueued, 0);
        assert_eq!(stats.messages_dropped, 0);
    }

    #[test]
    fn test_on_message_counts_drops() {
        let factory = Arc::new(StubFactory::default());
        let shared = shared_with_factory(BridgeConfig::default().with_queue_capacity(1), factory);
        let handler = ControlHandler::new(Arc::downgrade(&shared), 0);

        handler.on_message(InboundMessage::new("/p2p/device_public/aa_bb", "{}"));
        handler.on_message(InboundMessage::new("/p2p/device_public/aa_bb", "{}"));

        let stats = shared.stats.snapshot();
        assert_eq!(stats.messages_enqueued, 1);
        assert_eq!(stats.messages_dropped, 1);
    }
}
