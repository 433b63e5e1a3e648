//! The MQTT/UDP adapter.
//!
//! [`MqttUdpAdapter`] owns the bridge between the control-plane client and the
//! data-plane transport: it runs the connect loop, the message dispatcher and
//! the liveness sweeper, and lets either transport be replaced while running.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bridge_adapter::{BridgeConfig, DeviceSession, MqttConfig, MqttUdpAdapter};
//!
//! let adapter = MqttUdpAdapter::builder(MqttConfig::new("broker.local", 1883), factory)
//!     .with_udp_server(udp_server)
//!     .with_config(BridgeConfig::default())
//!     .with_on_new_connection(|session: Arc<DeviceSession>| {
//!         tracing::info!("new device {}", session.device_id());
//!     })
//!     .build()?;
//!
//! adapter.start()?;
//! // ...
//! adapter.stop().await;
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{BridgeConfig, MqttConfig};
use crate::connection;
use crate::dispatcher::{Dispatcher, NewConnectionHandler};
use crate::error::{BridgeError, Result};
use crate::handles::HandleHolder;
use crate::queue::{InboundQueue, InboundReceiver};
use crate::registry::SessionRegistry;
use crate::session::DeviceSession;
use crate::stats::{AdapterStats, StatsSnapshot};
use crate::sweeper;
use crate::transport::{ControlClient, ControlClientFactory, DataPlaneTransport};
use crate::types::{AdapterState, DeviceId};

/// State shared between the adapter and its background tasks.
pub(crate) struct Shared {
    pub(crate) config: BridgeConfig,
    pub(crate) handles: HandleHolder,
    pub(crate) registry: SessionRegistry,
    pub(crate) stats: AdapterStats,
    pub(crate) queue: InboundQueue,
    pub(crate) factory: Arc<dyn ControlClientFactory>,
    pub(crate) on_new_connection: Option<Arc<dyn NewConnectionHandler>>,
    pub(crate) lifetime: CancellationToken,
    pub(crate) sweeper_started: AtomicBool,
    /// Held while a session is bound to the current transport and while
    /// sessions are drained ahead of a transport swap or shutdown.
    pub(crate) transport_swap: Mutex<()>,
    receiver: Mutex<Option<InboundReceiver>>,
    connect_token: Mutex<Option<CancellationToken>>,
    state: Mutex<AdapterState>,
}

impl Shared {
    pub(crate) fn new(
        config: BridgeConfig,
        mqtt_config: MqttConfig,
        transport: Option<Arc<dyn DataPlaneTransport>>,
        factory: Arc<dyn ControlClientFactory>,
        on_new_connection: Option<Arc<dyn NewConnectionHandler>>,
    ) -> Self {
        let (queue, receiver) = InboundQueue::bounded(config.queue_capacity);
        Self {
            config,
            handles: HandleHolder::new(mqtt_config, transport),
            registry: SessionRegistry::new(),
            stats: AdapterStats::default(),
            queue,
            factory,
            on_new_connection,
            lifetime: CancellationToken::new(),
            sweeper_started: AtomicBool::new(false),
            transport_swap: Mutex::new(()),
            receiver: Mutex::new(Some(receiver)),
            connect_token: Mutex::new(None),
            state: Mutex::new(AdapterState::Created),
        }
    }

    pub(crate) fn state(&self) -> AdapterState {
        *self.state.lock()
    }

    /// Move to `next`. Returns `false` once stopped; `Stopped` is terminal.
    pub(crate) fn set_state(&self, next: AdapterState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        if *state != next {
            tracing::debug!("Adapter state {} -> {}", *state, next);
            *state = next;
        }
        true
    }

    fn replace_state_if(&self, expected: AdapterState, next: AdapterState) {
        let mut state = self.state.lock();
        if *state == expected {
            *state = next;
        }
    }

    /// Destroy a session and make sure its registry entry is gone.
    pub(crate) fn evict(&self, session: &Arc<DeviceSession>) {
        session.destroy();
        self.registry.remove_session(session);
    }

    /// Evict every registered session. Returns how many were evicted.
    pub(crate) fn destroy_all_sessions(&self) -> usize {
        let sessions = self.registry.snapshot();
        for session in &sessions {
            self.evict(session);
        }
        sessions.len()
    }

    /// Point every live session at the current client.
    pub(crate) fn update_sessions_client(&self, client: &Arc<dyn ControlClient>) {
        for session in self.registry.snapshot() {
            session.set_client(Arc::clone(client));
        }
    }

    /// Start a connect loop, cancelling any loop still running.
    fn spawn_connect_loop(self: &Arc<Self>) {
        let token = self.lifetime.child_token();
        if let Some(previous) = self.connect_token.lock().replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(connection::run_connect_loop(Arc::clone(self), token));
    }

    fn cancel_connect_loop(&self) {
        if let Some(token) = self.connect_token.lock().take() {
            token.cancel();
        }
    }
}

/// Bridges a control-plane client and a data-plane transport around per-device
/// sessions.
pub struct MqttUdpAdapter {
    shared: Arc<Shared>,
}

impl MqttUdpAdapter {
    /// Start building an adapter for the given broker.
    pub fn builder(
        mqtt_config: MqttConfig,
        factory: Arc<dyn ControlClientFactory>,
    ) -> AdapterBuilder {
        AdapterBuilder::new(mqtt_config, factory)
    }

    /// Start the dispatcher and the connect loop, returning immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::NoRuntime(e.to_string()))?;

        if self.shared.state().is_terminal() {
            return Err(BridgeError::Stopped);
        }
        let receiver = self
            .shared
            .receiver
            .lock()
            .take()
            .ok_or(BridgeError::AlreadyStarted)?;

        tracing::info!(
            "Starting MQTT/UDP adapter, broker: {}",
            self.shared.handles.mqtt_config().broker_url()
        );
        self.shared.set_state(AdapterState::Connecting);

        let dispatcher = Dispatcher::new(Arc::clone(&self.shared));
        runtime.spawn(dispatcher.run(receiver, self.shared.lifetime.clone()));
        self.shared.spawn_connect_loop();
        Ok(())
    }

    /// Shut the adapter down.
    ///
    /// Cancels the background tasks, disconnects the client, closes the
    /// transport and destroys all sessions. Every step is best-effort and a
    /// missing handle is skipped. Calling it again is a no-op.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = AdapterState::Stopped;
        }
        tracing::info!("Stopping MQTT/UDP adapter");

        self.shared.lifetime.cancel();
        self.shared.cancel_connect_loop();

        if let Some(client) = self.shared.handles.client() {
            if client.is_connected() {
                client.disconnect(self.shared.config.disconnect_grace).await;
            }
        }

        if let Some(transport) = self.shared.handles.transport() {
            if let Err(e) = transport.close().await {
                tracing::warn!("Failed to close UDP server: {}", e);
            }
        }

        let destroyed = {
            let _swap = self.shared.transport_swap.lock();
            self.shared.destroy_all_sessions()
        };
        tracing::info!("MQTT/UDP adapter stopped, {} sessions destroyed", destroyed);
    }

    /// Replace the broker config and reconnect with it.
    ///
    /// Every session is destroyed; devices get a fresh session with their next
    /// message.
    pub async fn reload_mqtt_client(&self, config: MqttConfig) -> Result<()> {
        config.validate()?;
        if self.shared.state().is_terminal() {
            return Err(BridgeError::Stopped);
        }

        tracing::info!("Reloading MQTT client, broker: {}", config.broker_url());
        let previous = self.shared.handles.swap_mqtt_config(config);
        if !self.shared.set_state(AdapterState::Reloading) {
            return Err(BridgeError::Stopped);
        }
        self.shared.cancel_connect_loop();

        if let Some(client) = previous {
            // a client that is between reconnects still has a driver to stop
            let grace = if client.is_connected() {
                self.shared.config.disconnect_grace
            } else {
                Duration::ZERO
            };
            client.disconnect(grace).await;
        }

        let destroyed = self.shared.destroy_all_sessions();
        tracing::info!("MQTT client reload destroyed {} sessions", destroyed);

        let started = self.shared.receiver.lock().is_none();
        if !started {
            self.shared
                .replace_state_if(AdapterState::Reloading, AdapterState::Created);
            return Ok(());
        }
        if !self.shared.set_state(AdapterState::Connecting) {
            return Err(BridgeError::Stopped);
        }
        self.shared.spawn_connect_loop();
        Ok(())
    }

    /// Replace the data-plane transport.
    ///
    /// Every session is destroyed before the previous transport is closed.
    pub async fn reload_udp_server(&self, transport: Arc<dyn DataPlaneTransport>) -> Result<()> {
        let prior = self.shared.state();
        if prior.is_terminal() || !self.shared.set_state(AdapterState::Reloading) {
            return Err(BridgeError::Stopped);
        }
        tracing::info!("Reloading UDP server");

        let (previous, destroyed) = {
            let _swap = self.shared.transport_swap.lock();
            let destroyed = self.shared.destroy_all_sessions();
            (self.shared.handles.set_transport(transport), destroyed)
        };
        self.shared
            .replace_state_if(AdapterState::Reloading, prior);

        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                tracing::warn!("Failed to close previous UDP server: {}", e);
            }
        }
        tracing::info!("UDP server reload destroyed {} sessions", destroyed);
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AdapterState {
        self.shared.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Whether the current control-plane client is connected.
    pub fn is_connected(&self) -> bool {
        self.shared
            .handles
            .client()
            .map(|client| client.is_connected())
            .unwrap_or(false)
    }

    /// The broker config the next connect attempt will use.
    pub fn mqtt_config(&self) -> MqttConfig {
        self.shared.handles.mqtt_config()
    }

    pub fn bridge_config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Look up the session of a device.
    pub fn session(&self, device_id: &DeviceId) -> Option<Arc<DeviceSession>> {
        self.shared.registry.get(device_id)
    }

    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Identifiers of every device with a live session.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.shared.registry.device_ids()
    }

    /// Destroy a device's session on a disconnect signal from the data plane.
    ///
    /// Returns `false` if the device had no session.
    pub fn disconnect_device(&self, device_id: &DeviceId) -> bool {
        match self.shared.registry.get(device_id) {
            Some(session) => {
                tracing::info!("Disconnecting device, deviceId: {}", device_id);
                self.shared.evict(&session);
                true
            }
            None => false,
        }
    }

    /// Run one liveness sweep now. Returns the number of evicted sessions.
    pub fn sweep_inactive(&self) -> usize {
        sweeper::sweep(&self.shared)
    }
}

impl Drop for MqttUdpAdapter {
    fn drop(&mut self) {
        self.shared.lifetime.cancel();
    }
}

impl std::fmt::Debug for MqttUdpAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttUdpAdapter")
            .field("state", &self.state())
            .field("sessions", &self.session_count())
            .finish()
    }
}

/// Builder for [`MqttUdpAdapter`].
///
/// `build()` validates both configs. The data-plane transport and the
/// new-connection handler are optional: without a transport no session can
/// be created until [`MqttUdpAdapter::reload_udp_server`] installs one.
pub struct AdapterBuilder {
    mqtt_config: MqttConfig,
    config: BridgeConfig,
    factory: Arc<dyn ControlClientFactory>,
    transport: Option<Arc<dyn DataPlaneTransport>>,
    on_new_connection: Option<Arc<dyn NewConnectionHandler>>,
}

impl AdapterBuilder {
    pub fn new(mqtt_config: MqttConfig, factory: Arc<dyn ControlClientFactory>) -> Self {
        Self {
            mqtt_config,
            config: BridgeConfig::default(),
            factory,
            transport: None,
            on_new_connection: None,
        }
    }

    pub fn with_udp_server(mut self, transport: Arc<dyn DataPlaneTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_on_new_connection<H>(mut self, handler: H) -> Self
    where
        H: NewConnectionHandler + 'static,
    {
        self.on_new_connection = Some(Arc::new(handler));
        self
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate configuration and build the adapter.
    pub fn build(self) -> Result<MqttUdpAdapter> {
        self.mqtt_config.validate()?;
        self.config.validate()?;

        let shared = Shared::new(
            self.config,
            self.mqtt_config,
            self.transport,
            self.factory,
            self.on_new_connection,
        );
        Ok(MqttUdpAdapter {
            shared: Arc::new(shared),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::error::{ControlError, TransportError};
    use crate::session::test_support::StubDataSession;
    use crate::transport::{ClientEventHandler, DataSession};
    use crate::types::QosLevel;

    #[derive(Default)]
    pub struct StubTransport {
        pub created: Mutex<Vec<(String, String)>>,
        pub closed_sessions: Mutex<Vec<String>>,
        pub closes: AtomicUsize,
        pub fail_create: AtomicBool,
    }

    #[async_trait]
    impl DataPlaneTransport for StubTransport {
        fn create_session(
            &self,
            device_id: &DeviceId,
            label: &str,
        ) -> std::result::Result<Arc<dyn DataSession>, TransportError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(TransportError::SessionCreation {
                    device_id: device_id.clone(),
                    reason: "no free ports".to_string(),
                });
            }
            self.created
                .lock()
                .push((device_id.to_string(), label.to_string()));
            Ok(Arc::new(StubDataSession::new(
                &format!("conn-{}", device_id),
                true,
            )))
        }

        fn close_session(&self, conn_id: &str) {
            self.closed_sessions.lock().push(conn_id.to_string());
        }

        async fn close(&self) -> std::result::Result<(), TransportError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct FactoryClient {
        pub handler: Arc<dyn ClientEventHandler>,
        fail: bool,
        pub connected: AtomicBool,
        pub subscriptions: Mutex<Vec<(String, QosLevel)>>,
        pub disconnects: AtomicUsize,
    }

    #[async_trait]
    impl ControlClient for FactoryClient {
        async fn connect(&self) -> std::result::Result<(), ControlError> {
            if self.fail {
                return Err(ControlError::Connect("connection refused".to_string()));
            }
            self.connected.store(true, Ordering::SeqCst);
            self.handler.on_connect(self);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn subscribe(&self, topic: &str, qos: QosLevel) -> std::result::Result<(), ControlError> {
            self.subscriptions.lock().push((topic.to_string(), qos));
            Ok(())
        }

        async fn publish(&self, _topic: &str, _payload: Bytes) -> std::result::Result<(), ControlError> {
            Ok(())
        }

        async fn disconnect(&self, _grace: Duration) {
            self.connected.store(false, Ordering::SeqCst);
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct StubFactory {
        pub built: AtomicU32,
        pub failures_before_connect: AtomicU32,
        pub clients: Mutex<Vec<Arc<FactoryClient>>>,
    }

    impl StubFactory {
        pub fn last_client(&self) -> Option<Arc<FactoryClient>> {
            self.clients.lock().last().cloned()
        }
    }

    impl ControlClientFactory for StubFactory {
        fn build(
            &self,
            _config: &MqttConfig,
            handler: Arc<dyn ClientEventHandler>,
        ) -> std::result::Result<Arc<dyn ControlClient>, ControlError> {
            self.built.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .failures_before_connect
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            let client = Arc::new(FactoryClient {
                handler,
                fail,
                connected: AtomicBool::new(false),
                subscriptions: Mutex::new(Vec::new()),
                disconnects: AtomicUsize::new(0),
            });
            self.clients.lock().push(Arc::clone(&client));
            Ok(client)
        }
    }

    pub fn shared(
        config: BridgeConfig,
        transport: Option<Arc<StubTransport>>,
        handler: Option<Arc<dyn NewConnectionHandler>>,
    ) -> Arc<Shared> {
        Arc::new(Shared::new(
            config,
            MqttConfig::new("localhost", 1883),
            transport.map(|t| t as Arc<dyn DataPlaneTransport>),
            Arc::new(StubFactory::default()),
            handler,
        ))
    }

    pub fn shared_with_factory(config: BridgeConfig, factory: Arc<StubFactory>) -> Arc<Shared> {
        Arc::new(Shared::new(
            config,
            MqttConfig::new("localhost", 1883),
            None,
            factory,
            None,
        ))
    }
}
