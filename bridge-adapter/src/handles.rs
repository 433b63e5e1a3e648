//! Replaceable transport handles.
//!
//! The current broker config, control-plane client and data-plane transport
//! sit behind one reader-writer lock. Readers get a cloned snapshot and never
//! hold the lock across an `.await`; writers (start, reload, stop) serialize
//! replacement.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::MqttConfig;
use crate::transport::{ControlClient, DataPlaneTransport};

struct Handles {
    mqtt_config: MqttConfig,
    client: Option<Arc<dyn ControlClient>>,
    client_generation: u64,
    transport: Option<Arc<dyn DataPlaneTransport>>,
}

/// Lock-guarded holder of the adapter's replaceable handles.
pub(crate) struct HandleHolder {
    inner: RwLock<Handles>,
}

impl HandleHolder {
    pub(crate) fn new(
        mqtt_config: MqttConfig,
        transport: Option<Arc<dyn DataPlaneTransport>>,
    ) -> Self {
        Self {
            inner: RwLock::new(Handles {
                mqtt_config,
                client: None,
                client_generation: 0,
                transport,
            }),
        }
    }

    pub(crate) fn mqtt_config(&self) -> MqttConfig {
        self.inner.read().mqtt_config.clone()
    }

    pub(crate) fn client(&self) -> Option<Arc<dyn ControlClient>> {
        self.inner.read().client.clone()
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn DataPlaneTransport>> {
        self.inner.read().transport.clone()
    }

    /// Bump the generation unconditionally.
    #[cfg(test)]
    pub(crate) fn next_generation(&self) -> u64 {
        let mut inner = self.inner.write();
        inner.client_generation += 1;
        inner.client_generation
    }

    /// Reserve a generation on behalf of a connect loop, unless its token has
    /// been cancelled.
    ///
    /// The check happens under the write lock, so a loop cancelled before its
    /// replacement was spawned can never reserve a newer generation than the
    /// replacement.
    pub(crate) fn reserve_generation(&self, token: &CancellationToken) -> Option<u64> {
        let mut inner = self.inner.write();
        if token.is_cancelled() {
            return None;
        }
        inner.client_generation += 1;
        Some(inner.client_generation)
    }

    /// Whether `generation` is still the newest client generation.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.inner.read().client_generation == generation
    }

    /// Install a freshly built client. Returns `false` if a newer generation
    /// was reserved meanwhile, in which case the client is not installed.
    pub(crate) fn install_client(&self, client: Arc<dyn ControlClient>, generation: u64) -> bool {
        let mut inner = self.inner.write();
        if inner.client_generation != generation {
            return false;
        }
        inner.client = Some(client);
        true
    }

    /// Replace the broker config, returning the client built from the old one.
    pub(crate) fn swap_mqtt_config(&self, config: MqttConfig) -> Option<Arc<dyn ControlClient>> {
        let mut inner = self.inner.write();
        inner.mqtt_config = config;
        // invalidates handler callbacks from the old client
        inner.client_generation += 1;
        inner.client.clone()
    }

    /// Replace the data-plane transport, returning the previous one.
    pub(crate) fn set_transport(
        &self,
        transport: Arc<dyn DataPlaneTransport>,
    ) -> Option<Arc<dyn DataPlaneTransport>> {
        self.inner.write().transport.replace(transport)
    }
}
