//! Signaling Transport.
//!
//! Moves connection-negotiation envelopes between the participants of a
//! room over a named broadcast channel. The channel is unordered
//! best-effort; delivery filtering happens on the receiving side.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use listenhall_shared::protocol::{SIGNAL_EVENT, SignalMessage, signal_channel};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    error::SessionError,
    transport::{ChannelEvent, ChannelTransport, TransportError},
};

/// Longest wait for the channel subscription to be acknowledged
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether `msg` is meant for `local_id`.
///
/// A participant never handles its own messages; a message addressed to
/// someone else is ignored; a message without an addressee is for everyone.
pub fn should_deliver(msg: &SignalMessage, local_id: &str) -> bool {
    if msg.from == local_id {
        return false;
    }
    match &msg.to {
        Some(to) => to == local_id,
        None => true,
    }
}

/// Entry point of the signaling layer
#[derive(Clone)]
pub struct SignalingTransport {
    transport: Arc<dyn ChannelTransport>,
    join_timeout: Duration,
}

impl SignalingTransport {
    pub fn new(transport: Arc<dyn ChannelTransport>) -> Self {
        Self::with_join_timeout(transport, JOIN_TIMEOUT)
    }

    pub fn with_join_timeout(transport: Arc<dyn ChannelTransport>, join_timeout: Duration) -> Self {
        Self {
            transport,
            join_timeout,
        }
    }

    /// Subscribe to the signaling channel of `room_id` as `participant_id`.
    ///
    /// # Errors
    ///
    /// [`SessionError::ChannelUnavailable`] when the subscription is not
    /// acknowledged within the join timeout or is refused.
    pub async fn join(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> Result<(SignalingHandle, SignalInbox), SessionError> {
        let channel = signal_channel(room_id);
        tracing::info!("Joining signaling channel '{}' as '{}'", channel, participant_id);

        let subscription =
            match tokio::time::timeout(self.join_timeout, self.transport.subscribe(&channel)).await
            {
                Ok(Ok(subscription)) => subscription,
                Ok(Err(e)) => {
                    return Err(SessionError::ChannelUnavailable {
                        channel,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        "Signaling channel '{}' not acknowledged within {:?}",
                        channel,
                        self.join_timeout
                    );
                    return Err(SessionError::ChannelUnavailable {
                        channel,
                        reason: TransportError::Timeout.to_string(),
                    });
                }
            };

        let handle = SignalingHandle {
            channel: channel.clone(),
            participant_id: participant_id.to_string(),
            transport: self.transport.clone(),
            left: Arc::new(AtomicBool::new(false)),
        };
        let inbox = SignalInbox {
            participant_id: participant_id.to_string(),
            events: subscription.events,
        };
        Ok((handle, inbox))
    }
}

/// Sending side of a joined signaling channel.
///
/// Clones refer to the same subscription; leaving through any clone leaves
/// for all of them.
#[derive(Clone)]
pub struct SignalingHandle {
    channel: String,
    participant_id: String,
    transport: Arc<dyn ChannelTransport>,
    left: Arc<AtomicBool>,
}

impl SignalingHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }

    /// Broadcast `msg` on the channel. No delivery guarantee.
    pub async fn send(&self, msg: &SignalMessage) -> Result<(), TransportError> {
        if self.has_left() {
            return Err(TransportError::Closed);
        }
        let payload =
            serde_json::to_value(msg).map_err(|e| TransportError::Encode(e.to_string()))?;
        tracing::debug!(
            "Signal {:?} {} -> {}",
            msg.r#type,
            msg.from,
            msg.to.as_deref().unwrap_or("*")
        );
        self.transport
            .send(&self.channel, SIGNAL_EVENT, payload)
            .await
    }

    /// Unsubscribe from the channel. Only the first call has an effect.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Leaving signaling channel '{}'", self.channel);
        if let Err(e) = self.transport.unsubscribe(&self.channel).await {
            tracing::warn!("Failed to unsubscribe from '{}': {}", self.channel, e);
        }
    }
}

/// Receiving side of a joined signaling channel
pub struct SignalInbox {
    participant_id: String,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl SignalInbox {
    /// Next message addressed to this participant.
    ///
    /// Returns `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        while let Some(event) = self.events.recv().await {
            if let Some(msg) = self.accept(event) {
                return Some(msg);
            }
        }
        None
    }

    fn accept(&self, event: ChannelEvent) -> Option<SignalMessage> {
        if event.event != SIGNAL_EVENT {
            return None;
        }
        let msg: SignalMessage = match serde_json::from_value(event.payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("Ignoring malformed signal from '{}': {}", event.from, e);
                return None;
            }
        };
        // The envelope must not claim another sender than the one the relay saw
        if msg.from != event.from {
            tracing::debug!(
                "Ignoring signal claiming '{}' sent by '{}'",
                msg.from,
                event.from
            );
            return None;
        }
        should_deliver(&msg, &self.participant_id).then_some(msg)
    }

    /// Hand every deliverable message to `handler` on a background task.
    pub fn on_message<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(SignalMessage) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(msg) = self.recv().await {
                handler(msg);
            }
        })
    }
}
