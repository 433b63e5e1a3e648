//! Per-device session binding the two transports.
//!
//! A [`DeviceSession`] unites a device's control-plane publish topic, the
//! current control-plane client and the data-plane session allocated for it.
//! Destruction is exactly-once: the first call to [`DeviceSession::destroy`]
//! closes the inbound command path and runs every registered close callback;
//! later calls are no-ops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::SessionError;
use crate::transport::{ControlClient, DataSession};
use crate::types::DeviceId;

/// Metadata key holding the data-plane AES key.
pub const AES_KEY: &str = "aes_key";
/// Metadata key holding the data-plane nonce.
pub const FULL_NONCE: &str = "full_nonce";

/// Callback run once when a session is destroyed.
pub type CloseCallback = Box<dyn FnOnce(&DeviceId) + Send>;

/// State shared by one device across both transports.
pub struct DeviceSession {
    device_id: DeviceId,
    publish_topic: String,
    client: RwLock<Arc<dyn ControlClient>>,
    data_session: Arc<dyn DataSession>,
    metadata: RwLock<HashMap<String, String>>,
    inbound_tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    close_callbacks: Mutex<Vec<CloseCallback>>,
    closed: AtomicBool,
    last_activity: Mutex<Instant>,
    idle_timeout: Duration,
}

impl DeviceSession {
    /// Create a session for `device_id`.
    ///
    /// `inbound_buffer` bounds how many forwarded payloads may wait for the
    /// business layer before [`push_inbound`](Self::push_inbound) starts failing.
    pub fn new(
        device_id: DeviceId,
        publish_topic: impl Into<String>,
        client: Arc<dyn ControlClient>,
        data_session: Arc<dyn DataSession>,
        inbound_buffer: usize,
        idle_timeout: Duration,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_buffer.max(1));
        Self {
            device_id,
            publish_topic: publish_topic.into(),
            client: RwLock::new(client),
            data_session,
            metadata: RwLock::new(HashMap::new()),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            close_callbacks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            idle_timeout,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Topic the device listens on for server messages.
    pub fn publish_topic(&self) -> &str {
        &self.publish_topic
    }

    /// Connection identifier of the underlying data-plane session.
    pub fn conn_id(&self) -> &str {
        self.data_session.conn_id()
    }

    pub fn data_session(&self) -> &Arc<dyn DataSession> {
        &self.data_session
    }

    /// AES key and nonce of the data-plane session.
    pub fn key_and_nonce(&self) -> (String, String) {
        self.data_session.key_and_nonce()
    }

    /// Attach a metadata value.
    pub fn set_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.write().insert(key.into(), value.into());
    }

    /// Read a metadata value.
    pub fn data(&self, key: &str) -> Option<String> {
        self.metadata.read().get(key).cloned()
    }

    /// Point the session at a new control-plane client.
    pub fn set_client(&self, client: Arc<dyn ControlClient>) {
        *self.client.write() = client;
    }

    /// The control-plane client currently used for publishing.
    pub fn client(&self) -> Arc<dyn ControlClient> {
        self.client.read().clone()
    }

    /// Whether the session should survive the next liveness sweep.
    ///
    /// Active means not destroyed, and either the data plane reports traffic
    /// or control-plane traffic arrived within the idle timeout.
    pub fn is_active(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.data_session.is_active() || self.last_activity.lock().elapsed() < self.idle_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record control-plane activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Register a callback run when the session is destroyed.
    ///
    /// If the session is already destroyed the callback runs immediately.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce(&DeviceId) + Send + 'static,
    {
        {
            let mut callbacks = self.close_callbacks.lock();
            if !self.is_closed() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback(&self.device_id);
    }

    /// Destroy the session. Returns `false` if it was already destroyed.
    pub fn destroy(&self) -> bool {
        let callbacks = {
            let mut callbacks = self.close_callbacks.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            std::mem::take(&mut *callbacks)
        };

        tracing::debug!("Destroying session, deviceId: {}", self.device_id);
        self.inbound_tx.lock().take();

        for callback in callbacks {
            callback(&self.device_id);
        }
        true
    }

    /// Hand a control-plane payload to the session's command path.
    ///
    /// Never blocks; fails if the buffer is full or the session is gone.
    pub fn push_inbound(&self, payload: Bytes) -> Result<(), SessionError> {
        let sender = self
            .inbound_tx
            .lock()
            .clone()
            .ok_or_else(|| SessionError::Closed(self.device_id.clone()))?;

        match sender.try_send(payload) {
            Ok(()) => {
                self.touch();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(SessionError::InboundFull(self.device_id.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(SessionError::Closed(self.device_id.clone()))
            }
        }
    }

    /// Take the receiving end of the inbound command path.
    ///
    /// Only the first caller gets it. The stream ends once the session is
    /// destroyed and the buffered payloads have been drained.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.inbound_rx.lock().take()
    }

    /// Publish a payload to the device's topic via the current client.
    pub async fn publish(&self, payload: Bytes) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.device_id.clone()));
        }
        let client = self.client();
        client.publish(&self.publish_topic, payload).await?;
        Ok(())
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device_id", &self.device_id)
            .field("publish_topic", &self.publish_topic)
            .field("conn_id", &self.conn_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
