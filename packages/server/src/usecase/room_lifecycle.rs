//! UseCase: ルームのライフサイクル（開始・終了・参照）

use std::sync::Arc;

use listenhall_shared::{protocol::ServerFrame, time::Clock};

use crate::domain::{
    ChannelName, ConnectionRegistry, MessagePusher, ParticipantId, Room, RoomId,
    RoomRepository, RoomRuleError, Timestamp,
};

use super::error::RoomCommandError;

/// Participants that follow a room: subscribers of its signaling channel
/// and watchers of its playback record, without duplicates.
pub(crate) async fn room_audience(
    registry: &dyn ConnectionRegistry,
    room_id: &RoomId,
) -> Vec<ParticipantId> {
    let mut targets = registry.subscribers(&ChannelName::for_room(room_id)).await;
    targets.extend(registry.watchers(room_id).await);
    targets.sort();
    targets.dedup();
    targets
}

impl From<RoomRuleError> for RoomCommandError {
    fn from(e: RoomRuleError) -> Self {
        match e {
            RoomRuleError::NotHost(id) => RoomCommandError::NotHost(id),
            RoomRuleError::AlreadyHosted(id) => RoomCommandError::AlreadyHosted(id),
            RoomRuleError::NotLive => RoomCommandError::NotLive,
        }
    }
}

/// ルームのライフサイクルのユースケース
pub struct RoomLifecycleUseCase {
    rooms: Arc<dyn RoomRepository>,
    registry: Arc<dyn ConnectionRegistry>,
    message_pusher: Arc<dyn MessagePusher>,
    clock: Arc<dyn Clock>,
}

impl RoomLifecycleUseCase {
    pub fn new(
        rooms: Arc<dyn RoomRepository>,
        registry: Arc<dyn ConnectionRegistry>,
        message_pusher: Arc<dyn MessagePusher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rooms,
            registry,
            message_pusher,
            clock,
        }
    }

    /// ルームを開始する
    ///
    /// 存在しないルームは `host_id` をホストとして作成される。
    /// 開始すると再生状態は空の状態に初期化される。
    pub async fn start(
        &self,
        host_id: &ParticipantId,
        room_id: RoomId,
    ) -> Result<Room, RoomCommandError> {
        let now = Timestamp::new(self.clock.now_millis());
        let mut room = match self.rooms.find(&room_id).await {
            Some(room) => room,
            None => Room::scheduled(room_id.clone(), host_id.clone(), now),
        };
        let was_live = room.is_live();
        room.start(host_id)?;
        self.rooms.save(room.clone()).await;

        if !was_live {
            tracing::info!("Room '{}' started by host '{}'", room.id, host_id);
            let targets = room_audience(self.registry.as_ref(), &room.id).await;
            let started = ServerFrame::RoomStarted {
                room_id: room.id.to_string(),
                host_id: host_id.to_string(),
            };
            let playback = ServerFrame::PlaybackChanged {
                room_id: room.id.to_string(),
                state: room.playback.clone(),
            };
            for frame in [started, playback] {
                if let Err(e) = self.message_pusher.broadcast(targets.clone(), &frame).await {
                    tracing::warn!("Failed to notify start of room '{}': {}", room.id, e);
                }
            }
        }

        Ok(room)
    }

    /// ルームを終了する。ホストのみが終了でき、終了済みなら何もしない。
    pub async fn end(
        &self,
        by: &ParticipantId,
        room_id: &RoomId,
    ) -> Result<Room, RoomCommandError> {
        let mut room = self
            .rooms
            .find(room_id)
            .await
            .ok_or_else(|| RoomCommandError::RoomNotFound(room_id.to_string()))?;
        let was_live = room.is_live();
        room.end(by, Timestamp::new(self.clock.now_millis()))?;
        self.rooms.save(room.clone()).await;

        if was_live {
            tracing::info!("Room '{}' ended by host '{}'", room.id, by);
            let targets = room_audience(self.registry.as_ref(), room_id).await;
            let frame = ServerFrame::RoomEnded {
                room_id: room_id.to_string(),
                host_id: room.host_id.to_string(),
            };
            if let Err(e) = self.message_pusher.broadcast(targets, &frame).await {
                tracing::warn!("Failed to broadcast room-ended for '{}': {}", room_id, e);
            }
        }

        Ok(room)
    }

    pub async fn describe(&self, room_id: &RoomId) -> Result<Room, RoomCommandError> {
        self.rooms
            .find(room_id)
            .await
            .ok_or_else(|| RoomCommandError::RoomNotFound(room_id.to_string()))
    }

    pub async fn list(&self) -> Vec<Room> {
        self.rooms.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::test_support::{Fixture, channel, participant, room_id};
    use listenhall_shared::protocol::{PlaybackState, RoomStatus};

    fn usecase(fixture: &Fixture) -> RoomLifecycleUseCase {
        RoomLifecycleUseCase::new(
            fixture.rooms.clone(),
            fixture.registry.clone(),
            fixture.pusher.clone(),
            Arc::new(fixture.clock.clone()),
        )
    }

    #[tokio::test]
    async fn test_start_creates_live_room() {
        // テスト項目: 存在しないルームを開始すると live なルームが作成される
        // given (前提条件):
        let fixture = Fixture::new();
        let usecase = usecase(&fixture);

        // when (操作):
        let room = usecase
            .start(&participant("host"), room_id("party"))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(room.status, RoomStatus::Live);
        assert!(room.is_host(&participant("host")));
        assert_eq!(room.playback, PlaybackState::empty());
        assert_eq!(usecase.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_notifies_channel_subscribers() {
        // テスト項目: ルーム開始がシグナリングチャンネルの購読者に通知される
        // given (前提条件):
        let fixture = Fixture::new();
        let mut viewer_rx = fixture.connect("viewer").await;
        fixture
            .registry
            .subscribe(&participant("viewer"), channel("room:party"))
            .await
            .unwrap();

        // when (操作):
        usecase(&fixture)
            .start(&participant("host"), room_id("party"))
            .await
            .unwrap();

        // then (期待する結果):
        let frame: serde_json::Value =
            serde_json::from_str(&viewer_rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "room-started");
        assert_eq!(frame["host_id"], "host");
        let frame: serde_json::Value =
            serde_json::from_str(&viewer_rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "playback-changed");
    }

    #[tokio::test]
    async fn test_start_by_second_host_is_rejected() {
        // テスト項目: live 中のルームを別の参加者が開始するとエラー
        // given (前提条件):
        let fixture = Fixture::new();
        let usecase = usecase(&fixture);
        usecase
            .start(&participant("host"), room_id("party"))
            .await
            .unwrap();

        // when (操作):
        let result = usecase.start(&participant("mallory"), room_id("party")).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(RoomCommandError::AlreadyHosted("host".to_string()))
        );
    }

    #[tokio::test]
    async fn test_end_by_non_host_is_rejected() {
        // テスト項目: ホスト以外はルームを終了できない
        // given (前提条件):
        let fixture = Fixture::new();
        let usecase = usecase(&fixture);
        usecase
            .start(&participant("host"), room_id("party"))
            .await
            .unwrap();

        // when (操作):
        let result = usecase.end(&participant("viewer"), &room_id("party")).await;

        // then (期待する結果):
        assert_eq!(result, Err(RoomCommandError::NotHost("viewer".to_string())));
        assert!(usecase.describe(&room_id("party")).await.unwrap().is_live());
    }

    #[tokio::test]
    async fn test_end_archives_room() {
        // テスト項目: 終了したルームは ended として参照できる
        // given (前提条件):
        let fixture = Fixture::new();
        let usecase = usecase(&fixture);
        usecase
            .start(&participant("host"), room_id("party"))
            .await
            .unwrap();

        // when (操作):
        usecase
            .end(&participant("host"), &room_id("party"))
            .await
            .unwrap();

        // then (期待する結果):
        let room = usecase.describe(&room_id("party")).await.unwrap();
        assert_eq!(room.status, RoomStatus::Ended);
    }

    #[tokio::test]
    async fn test_describe_unknown_room() {
        // テスト項目: 存在しないルームの参照は RoomNotFound
        let fixture = Fixture::new();
        let result = usecase(&fixture).describe(&room_id("nope")).await;
        assert_eq!(result, Err(RoomCommandError::RoomNotFound("nope".to_string())));
    }
}
