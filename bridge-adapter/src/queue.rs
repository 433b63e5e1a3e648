//! Bounded, lossy inbound message queue.
//!
//! The control-plane client delivers messages from its own execution context
//! and must never be blocked by processing. [`InboundQueue::offer`] therefore
//! attempts a non-blocking enqueue and drops the message when the buffer is
//! full.

use tokio::sync::mpsc;

use crate::types::InboundMessage;

/// Producer half of the inbound queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct InboundQueue {
    tx: mpsc::Sender<InboundMessage>,
}

/// Consumer half of the inbound queue.
#[derive(Debug)]
pub struct InboundReceiver {
    rx: mpsc::Receiver<InboundMessage>,
}

impl InboundQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn bounded(capacity: usize) -> (Self, InboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, InboundReceiver { rx })
    }

    /// Enqueue without blocking. Returns `false` if the message was dropped.
    pub fn offer(&self, message: InboundMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::debug!(
                    "handleMessage msg chan is full, topic: {}, payload: {}",
                    message.topic,
                    String::from_utf8_lossy(&message.payload)
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                tracing::debug!(
                    "handleMessage msg chan is closed, topic: {}",
                    message.topic
                );
                false
            }
        }
    }

    /// Free slots left in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }
}

impl InboundReceiver {
    /// Wait for the next message; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Take a message if one is ready.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }
}
