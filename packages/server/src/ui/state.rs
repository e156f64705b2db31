//! Shared application state.

use std::{sync::Arc, time::Duration};

use listenhall_shared::time::Clock;

use crate::{
    domain::{ConnectionRegistry, MessagePusher, RoomRepository},
    infrastructure::{
        message_pusher::WebSocketMessagePusher,
        repository::{InMemoryConnectionRegistry, InMemoryRoomRepository},
    },
    usecase::{
        ChannelSubscriptionUseCase, ConnectParticipantUseCase, DisconnectParticipantUseCase,
        PlaybackUseCase, PresenceUseCase, RelayBroadcastUseCase, RoomLifecycleUseCase,
    },
};

/// Use cases shared by every handler
pub struct AppState {
    pub connect_participant_usecase: Arc<ConnectParticipantUseCase>,
    pub disconnect_participant_usecase: Arc<DisconnectParticipantUseCase>,
    pub room_lifecycle_usecase: Arc<RoomLifecycleUseCase>,
    pub channel_subscription_usecase: Arc<ChannelSubscriptionUseCase>,
    pub relay_broadcast_usecase: Arc<RelayBroadcastUseCase>,
    pub playback_usecase: Arc<PlaybackUseCase>,
    pub presence_usecase: Arc<PresenceUseCase>,
    pub message_pusher: Arc<dyn MessagePusher>,
}

impl AppState {
    /// Wire every use case to the given collaborators
    pub fn new(
        rooms: Arc<dyn RoomRepository>,
        registry: Arc<dyn ConnectionRegistry>,
        message_pusher: Arc<dyn MessagePusher>,
        clock: Arc<dyn Clock>,
        heartbeat_timeout: Duration,
    ) -> Self {
        let disconnect_participant_usecase = Arc::new(DisconnectParticipantUseCase::new(
            rooms.clone(),
            registry.clone(),
            message_pusher.clone(),
            clock.clone(),
        ));
        Self {
            connect_participant_usecase: Arc::new(ConnectParticipantUseCase::new(
                registry.clone(),
                message_pusher.clone(),
                clock.clone(),
            )),
            room_lifecycle_usecase: Arc::new(RoomLifecycleUseCase::new(
                rooms.clone(),
                registry.clone(),
                message_pusher.clone(),
                clock.clone(),
            )),
            channel_subscription_usecase: Arc::new(ChannelSubscriptionUseCase::new(
                registry.clone(),
            )),
            relay_broadcast_usecase: Arc::new(RelayBroadcastUseCase::new(
                registry.clone(),
                message_pusher.clone(),
            )),
            playback_usecase: Arc::new(PlaybackUseCase::new(
                rooms,
                registry.clone(),
                message_pusher.clone(),
            )),
            presence_usecase: Arc::new(PresenceUseCase::new(
                registry,
                disconnect_participant_usecase.clone(),
                clock,
                heartbeat_timeout,
            )),
            disconnect_participant_usecase,
            message_pusher,
        }
    }

    /// State backed by the in-memory repositories
    pub fn in_memory(clock: Arc<dyn Clock>, heartbeat_timeout: Duration) -> Self {
        Self::new(
            Arc::new(InMemoryRoomRepository::new()),
            Arc::new(InMemoryConnectionRegistry::new()),
            Arc::new(WebSocketMessagePusher::new()),
            clock,
            heartbeat_timeout,
        )
    }
}
