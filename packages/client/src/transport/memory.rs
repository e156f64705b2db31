//! In-process transport hub.
//!
//! One [`InMemoryHub`] stands in for the relay server; each participant gets
//! its own [`InMemoryTransport`] from [`InMemoryHub::transport`]. Used by the
//! tests and by local demos.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use listenhall_shared::protocol::{ErrorCode, PlaybackState, RoomStatus};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use super::{
    ChannelEvent, ChannelSubscription, ChannelTransport, RoomDirectory, RoomInfo, TransportError,
};
use crate::sync::{InMemoryPlaybackStore, PlaybackStore};

#[derive(Debug, Clone)]
struct RoomRecord {
    host_id: String,
    status: RoomStatus,
}

#[derive(Default)]
struct HubState {
    /// channel -> participant -> inbound sender
    channels: HashMap<String, HashMap<String, mpsc::UnboundedSender<ChannelEvent>>>,
    rooms: HashMap<String, RoomRecord>,
    /// While set, subscriptions are never acknowledged
    unavailable: bool,
}

/// Shared in-process relay
#[derive(Clone, Default)]
pub struct InMemoryHub {
    state: Arc<Mutex<HubState>>,
    playback: InMemoryPlaybackStore,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport bound to `participant_id`
    pub fn transport(&self, participant_id: impl Into<String>) -> InMemoryTransport {
        InMemoryTransport {
            participant_id: participant_id.into(),
            hub: self.clone(),
        }
    }

    /// Stop (or resume) acknowledging subscriptions
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    /// Drop every subscription of `participant_id`, as a lost connection would.
    pub async fn drop_participant(&self, participant_id: &str) {
        let mut state = self.state.lock().await;
        for members in state.channels.values_mut() {
            members.remove(participant_id);
        }
    }

    pub async fn playback(&self, room_id: &str) -> Option<PlaybackState> {
        self.playback.get(room_id).await
    }
}

/// One participant's view of an [`InMemoryHub`]
#[derive(Clone)]
pub struct InMemoryTransport {
    participant_id: String,
    hub: InMemoryHub,
}

impl InMemoryTransport {
    async fn live_room(&self, room_id: &str) -> Result<RoomRecord, TransportError> {
        let state = self.hub.state.lock().await;
        match state.rooms.get(room_id) {
            Some(room) => Ok(room.clone()),
            None => Err(TransportError::Rejected {
                code: ErrorCode::RoomNotFound,
                message: format!("room '{}' does not exist", room_id),
            }),
        }
    }
}

#[async_trait]
impl ChannelTransport for InMemoryTransport {
    fn participant_id(&self) -> &str {
        &self.participant_id
    }

    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, TransportError> {
        let mut state = self.hub.state.lock().await;
        if state.unavailable {
            drop(state);
            tracing::debug!("Hub unavailable, '{}' is never acknowledged", channel);
            std::future::pending::<()>().await;
            return Err(TransportError::Timeout);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(self.participant_id.clone(), tx);
        Ok(ChannelSubscription {
            channel: channel.to_string(),
            events: rx,
        })
    }

    async fn send(&self, channel: &str, event: &str, payload: Value) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        let Some(members) = state.channels.get_mut(channel) else {
            return Ok(());
        };
        // A closed receiver is a subscription nobody listens to anymore
        members.retain(|participant_id, tx| {
            if *participant_id == self.participant_id {
                return true;
            }
            tx.send(ChannelEvent {
                event: event.to_string(),
                from: self.participant_id.clone(),
                payload: payload.clone(),
            })
            .is_ok()
        });
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        if let Some(members) = state.channels.get_mut(channel) {
            members.remove(&self.participant_id);
            if members.is_empty() {
                state.channels.remove(channel);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for InMemoryTransport {
    async fn start_room(&self, room_id: &str) -> Result<RoomInfo, TransportError> {
        {
            let mut state = self.hub.state.lock().await;
            if let Some(room) = state.rooms.get(room_id)
                && room.status == RoomStatus::Live
                && room.host_id != self.participant_id
            {
                return Err(TransportError::Rejected {
                    code: ErrorCode::NotHost,
                    message: format!("room '{}' is hosted by '{}'", room_id, room.host_id),
                });
            }
            state.rooms.insert(
                room_id.to_string(),
                RoomRecord {
                    host_id: self.participant_id.clone(),
                    status: RoomStatus::Live,
                },
            );
        }
        self.hub
            .playback
            .upsert(room_id, PlaybackState::empty())
            .await?;

        Ok(RoomInfo {
            room_id: room_id.to_string(),
            host_id: self.participant_id.clone(),
            status: RoomStatus::Live,
        })
    }

    async fn end_room(&self, room_id: &str) -> Result<(), TransportError> {
        let mut state = self.hub.state.lock().await;
        match state.rooms.get_mut(room_id) {
            Some(room) if room.host_id == self.participant_id => {
                room.status = RoomStatus::Ended;
                Ok(())
            }
            Some(_) => Err(TransportError::Rejected {
                code: ErrorCode::NotHost,
                message: format!("only the host may end room '{}'", room_id),
            }),
            None => Err(TransportError::Rejected {
                code: ErrorCode::RoomNotFound,
                message: format!("room '{}' does not exist", room_id),
            }),
        }
    }

    async fn describe_room(&self, room_id: &str) -> Result<RoomInfo, TransportError> {
        let room = self.live_room(room_id).await?;
        Ok(RoomInfo {
            room_id: room_id.to_string(),
            host_id: room.host_id,
            status: room.status,
        })
    }
}

#[async_trait]
impl PlaybackStore for InMemoryTransport {
    async fn upsert(&self, room_id: &str, state: PlaybackState) -> Result<(), TransportError> {
        let room = self.live_room(room_id).await?;
        if room.status != RoomStatus::Live || room.host_id != self.participant_id {
            return Err(TransportError::Rejected {
                code: ErrorCode::StateWriteRejected,
                message: format!("only the host may write the playback of '{}'", room_id),
            });
        }
        self.hub.playback.upsert(room_id, state).await
    }

    async fn watch(
        &self,
        room_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<PlaybackState>, TransportError> {
        self.live_room(room_id).await?;
        self.hub.playback.watch(room_id).await
    }
}
