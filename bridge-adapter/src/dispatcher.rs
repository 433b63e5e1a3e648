//! Message dispatcher.
//!
//! A single consumer drains the inbound queue in arrival order. For every
//! message it validates the envelope, resolves the device from the topic,
//! creates the device session on first contact and forwards the payload to the
//! session's inbound command path. Failures are logged and skipped; nothing
//! here stops the loop.

use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::adapter::Shared;
use crate::error::DispatchError;
use crate::queue::InboundReceiver;
use crate::session::{DeviceSession, AES_KEY, FULL_NONCE};
use crate::stats::AdapterStats;
use crate::transport::DataPlaneTransport;
use crate::types::{DeviceId, InboundMessage, MessageEnvelope};

/// Business collaborator notified when a device session is created.
///
/// Invoked exactly once per session, synchronously on the dispatcher task and
/// before the first payload is forwarded. Implementations that need to do
/// slow work should take the session's inbound path and spawn a task.
pub trait NewConnectionHandler: Send + Sync {
    fn on_new_connection(&self, session: Arc<DeviceSession>);
}

impl<F> NewConnectionHandler for F
where
    F: Fn(Arc<DeviceSession>) + Send + Sync,
{
    fn on_new_connection(&self, session: Arc<DeviceSession>) {
        self(session)
    }
}

/// What happened to a dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    /// A new session was created and the payload forwarded to it
    Created(DeviceId),
    /// The payload was forwarded to an existing session
    Forwarded(DeviceId),
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Drain the queue until cancelled.
    pub(crate) async fn run(self, mut receiver: InboundReceiver, token: CancellationToken) {
        tracing::debug!("Message dispatcher started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                message = receiver.recv() => {
                    let Some(message) = message else { break };
                    let topic = message.topic.clone();
                    match self.dispatch(message) {
                        Ok(DispatchOutcome::Created(device_id)) => {
                            tracing::info!("Created device session, deviceId: {}", device_id);
                        }
                        Ok(DispatchOutcome::Forwarded(device_id)) => {
                            tracing::debug!("Forwarded message, deviceId: {}", device_id);
                        }
                        Err(e) => {
                            tracing::error!("handleMessage failed, topic: {}, error: {}", topic, e);
                        }
                    }
                }
            }
        }
        tracing::debug!("Message dispatcher stopped");
    }

    /// Process one inbound message.
    pub(crate) fn dispatch(&self, message: InboundMessage) -> Result<DispatchOutcome, DispatchError> {
        let shared = &self.shared;

        if let Err(source) = MessageEnvelope::decode(&message.payload) {
            AdapterStats::incr(&shared.stats.decode_failures);
            return Err(DispatchError::Envelope {
                topic: message.topic,
                source,
            });
        }

        let Some(address) = shared.config.topic_scheme.parse(&message.topic) else {
            AdapterStats::incr(&shared.stats.unresolved_topics);
            return Err(DispatchError::UnresolvedTopic(message.topic));
        };

        let (session, created) = match shared.registry.get(&address.device_id) {
            Some(session) => (session, false),
            None => {
                let session = self.create_session(address.device_id, &address.raw_token)?;
                (session, true)
            }
        };

        if let Err(e) = session.push_inbound(message.payload) {
            AdapterStats::incr(&shared.stats.forward_failures);
            return Err(e.into());
        }

        let device_id = session.device_id().clone();
        Ok(if created {
            DispatchOutcome::Created(device_id)
        } else {
            DispatchOutcome::Forwarded(device_id)
        })
    }

    fn create_session(
        &self,
        device_id: DeviceId,
        raw_token: &str,
    ) -> Result<Arc<DeviceSession>, DispatchError> {
        let shared = &self.shared;

        let session = {
            // a transport reload cannot drain the registry between binding
            // the session to a transport and registering it
            let _swap = shared.transport_swap.lock();
            if shared.lifetime.is_cancelled() {
                return Err(DispatchError::Stopped(device_id));
            }

            let transport = shared
                .handles
                .transport()
                .ok_or_else(|| DispatchError::TransportUnavailable(device_id.clone()))?;
            let client = shared
                .handles
                .client()
                .ok_or_else(|| DispatchError::ClientUnavailable(device_id.clone()))?;

            let data_session = transport.create_session(&device_id, "")?;
            let publish_topic = format!("{}{}", shared.config.publish_topic_prefix, raw_token);
            tracing::debug!(
                "Creating device session, deviceId: {}, conn_id: {}, publish_topic: {}",
                device_id,
                data_session.conn_id(),
                publish_topic
            );

            let session = Arc::new(DeviceSession::new(
                device_id,
                publish_topic,
                client,
                data_session,
                shared.config.inbound_command_buffer,
                shared.config.session_idle_timeout,
            ));

            let (aes_key, full_nonce) = session.key_and_nonce();
            session.set_data(AES_KEY, aes_key);
            session.set_data(FULL_NONCE, full_nonce);

            shared.registry.insert(Arc::clone(&session));
            session.on_close(deregister(
                Arc::downgrade(shared),
                transport,
                session.conn_id().to_string(),
            ));
            session
        };
        AdapterStats::incr(&shared.stats.sessions_created);

        if let Some(handler) = &shared.on_new_connection {
            handler.on_new_connection(Arc::clone(&session));
        }

        Ok(session)
    }
}

/// Close callback removing a destroyed session from the registry and
/// releasing its data-plane session on the transport that created it.
fn deregister(
    shared: Weak<Shared>,
    transport: Arc<dyn DataPlaneTransport>,
    conn_id: String,
) -> impl FnOnce(&DeviceId) + Send + 'static {
    move |device_id: &DeviceId| {
        tracing::debug!("Session closed, deviceId: {}, conn_id: {}", device_id, conn_id);
        transport.close_session(&conn_id);

        let Some(shared) = shared.upgrade() else { return };
        shared.registry.remove_if_conn(device_id, &conn_id);
        AdapterStats::incr(&shared.stats.sessions_destroyed);
    }
}
