//! In-process event subscriptions
//!
//! Every fanned-out envelope is published on one broadcast channel. A
//! `ChannelSubscription` is a receiver that only yields envelopes for the
//! actor it asked for (or everything when no actor was named).

use tokio::sync::broadcast;
use tracing::warn;

use crate::event_store::EventEnvelope;
use crate::transport::SubscriptionRequest;

/// Broadcast hub for in-process subscribers
#[derive(Clone)]
pub struct SubscriptionHub {
    tx: broadcast::Sender<EventEnvelope>,
}

impl SubscriptionHub {
    /// # Arguments
    /// * `capacity` - Envelopes buffered per subscriber before it lags
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an envelope. Returns the number of live subscribers.
    pub fn publish(&self, envelope: &EventEnvelope) -> usize {
        self.tx.send(envelope.clone()).unwrap_or(0)
    }

    pub fn subscribe(&self, request: SubscriptionRequest) -> ChannelSubscription {
        ChannelSubscription {
            request,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Receiver scoped to one channel and optional actor
pub struct ChannelSubscription {
    request: SubscriptionRequest,
    rx: broadcast::Receiver<EventEnvelope>,
}

impl ChannelSubscription {
    pub fn request(&self) -> &SubscriptionRequest {
        &self.request
    }

    pub fn channel_id(&self) -> &str {
        &self.request.channel_id
    }

    fn accepts(&self, envelope: &EventEnvelope) -> bool {
        self.request
            .actor_id
            .as_ref()
            .map_or(true, |actor| actor == &envelope.event.actor_id)
    }

    /// Next matching envelope, or `None` once the hub is gone.
    ///
    /// A subscriber that falls behind skips the envelopes it missed; it can
    /// catch up with an incremental sync.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if self.accepts(&envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel_id = %self.request.channel_id, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Matching envelope if one is already buffered.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if self.accepts(&envelope) => return Some(envelope),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(channel_id = %self.request.channel_id, skipped, "subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
