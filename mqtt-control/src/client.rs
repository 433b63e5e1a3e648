//! Control-plane client on top of rumqttc.
//!
//! `connect` drives the event loop until the broker acknowledges the session,
//! then hands the loop to a driver task. The driver reports every CONNACK to
//! the handler (rumqttc reconnects on its own after a poll error, so this is
//! where subscriptions get restored), forwards every PUBLISH, and exits on
//! disconnect or when the client is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bridge_adapter::{ClientEventHandler, ControlClient, ControlError, InboundMessage, QosLevel};
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ClientSettings;

/// A single rumqttc connection.
pub struct RumqttControlClient {
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    handler: Arc<dyn ClientEventHandler>,
    connected: AtomicBool,
    settings: ClientSettings,
    driver: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    this: Weak<Self>,
}

impl RumqttControlClient {
    pub fn new(
        options: MqttOptions,
        handler: Arc<dyn ClientEventHandler>,
        settings: ClientSettings,
    ) -> Arc<Self> {
        let (client, eventloop) = AsyncClient::new(options, settings.request_capacity);
        Arc::new_cyclic(|this| Self {
            client,
            eventloop: Mutex::new(Some(eventloop)),
            handler,
            connected: AtomicBool::new(false),
            settings,
            driver: Mutex::new(None),
            shutdown: CancellationToken::new(),
            this: this.clone(),
        })
    }

    async fn drive(this: Weak<Self>, mut eventloop: EventLoop, shutdown: CancellationToken, delay: Duration) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = eventloop.poll() => event,
            };
            let Some(client) = this.upgrade() else { break };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        tracing::info!("MQTT session re-established");
                        client.connected.store(true, Ordering::Release);
                        client.handler.on_connect(client.as_ref());
                    } else {
                        tracing::warn!("MQTT broker refused reconnect: {:?}", ack.code);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    client
                        .handler
                        .on_message(InboundMessage::new(publish.topic, publish.payload));
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    client.connected.store(false, Ordering::Release);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if client.connected.swap(false, Ordering::AcqRel) {
                        client
                            .handler
                            .on_connection_lost(&ControlError::ConnectionLost(e.to_string()));
                    } else {
                        tracing::debug!("MQTT reconnect attempt failed: {}", e);
                    }
                    drop(client);

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        tracing::debug!("MQTT driver stopped");
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ControlError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(ControlError::Connect(format!("{:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(ControlError::Connect(e.to_string())),
        }
    }
}

fn to_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[async_trait]
impl ControlClient for RumqttControlClient {
    async fn connect(&self) -> Result<(), ControlError> {
        let mut eventloop = self
            .eventloop
            .lock()
            .take()
            .ok_or(ControlError::AlreadyConsumed)?;

        let timeout = self.settings.connect_timeout;
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Err(_) => return Err(ControlError::Timeout(timeout)),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(())) => {}
        }

        self.connected.store(true, Ordering::Release);
        self.handler.on_connect(self);

        let driver = tokio::spawn(Self::drive(
            self.this.clone(),
            eventloop,
            self.shutdown.clone(),
            self.settings.reconnect_delay,
        ));
        *self.driver.lock() = Some(driver);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), ControlError> {
        self.client
            .try_subscribe(topic, to_qos(qos))
            .map_err(|e| ControlError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::NotConnected);
        }
        self.client
            .publish_bytes(topic, to_qos(self.settings.publish_qos), false, payload)
            .await
            .map_err(|e| ControlError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self, grace: Duration) {
        self.connected.store(false, Ordering::Release);
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!("Failed to queue MQTT disconnect: {}", e);
        }

        let driver = self.driver.lock().take();
        if let Some(driver) = driver {
            if tokio::time::timeout(grace, driver).await.is_err() {
                tracing::debug!("MQTT driver still running after {:?}, cancelling", grace);
            }
        }
        self.shutdown.cancel();
    }
}

impl Drop for RumqttControlClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
