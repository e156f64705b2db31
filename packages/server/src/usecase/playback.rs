//! UseCase: ルームごとの再生状態レコード
//!
//! 書き込みはルームのホストだけに許される（single writer）。
//! `last_update` はホストが打刻した値をそのまま保存する。

use std::sync::Arc;

use listenhall_shared::protocol::{PlaybackState, ServerFrame};

use crate::domain::{
    ConnectionRegistry, MessagePusher, ParticipantId, RoomId, RoomRepository,
};

use super::error::PlaybackError;

/// 再生状態のユースケース
pub struct PlaybackUseCase {
    rooms: Arc<dyn RoomRepository>,
    registry: Arc<dyn ConnectionRegistry>,
    message_pusher: Arc<dyn MessagePusher>,
}

impl PlaybackUseCase {
    pub fn new(
        rooms: Arc<dyn RoomRepository>,
        registry: Arc<dyn ConnectionRegistry>,
        message_pusher: Arc<dyn MessagePusher>,
    ) -> Self {
        Self {
            rooms,
            registry,
            message_pusher,
        }
    }

    /// 再生状態を置き換え、監視している参加者に通知する
    pub async fn upsert(
        &self,
        writer: &ParticipantId,
        room_id: &RoomId,
        state: PlaybackState,
    ) -> Result<(), PlaybackError> {
        let mut room = self
            .rooms
            .find(room_id)
            .await
            .ok_or_else(|| PlaybackError::RoomNotFound(room_id.to_string()))?;
        room.write_playback(writer, state.clone())
            .map_err(|e| PlaybackError::StateWriteRejected(e.to_string()))?;
        self.rooms.save(room).await;

        let watchers: Vec<ParticipantId> = self
            .registry
            .watchers(room_id)
            .await
            .into_iter()
            .filter(|id| id != writer)
            .collect();
        let frame = ServerFrame::PlaybackChanged {
            room_id: room_id.to_string(),
            state,
        };
        if let Err(e) = self.message_pusher.broadcast(watchers, &frame).await {
            tracing::warn!("Failed to notify playback change of '{}': {}", room_id, e);
        }
        tracing::debug!("Playback of room '{}' updated by '{}'", room_id, writer);
        Ok(())
    }

    /// 再生状態の監視を登録し、現在の状態をすぐに送る
    pub async fn watch(
        &self,
        participant_id: &ParticipantId,
        room_id: &RoomId,
    ) -> Result<PlaybackState, PlaybackError> {
        let room = self
            .rooms
            .find(room_id)
            .await
            .ok_or_else(|| PlaybackError::RoomNotFound(room_id.to_string()))?;
        self.registry
            .watch(participant_id, room_id.clone())
            .await
            .map_err(|_| PlaybackError::NotConnected(participant_id.to_string()))?;

        let frame = ServerFrame::PlaybackChanged {
            room_id: room_id.to_string(),
            state: room.playback.clone(),
        };
        if let Err(e) = self.message_pusher.push_to(participant_id, &frame).await {
            tracing::warn!("Failed to push current playback to '{}': {}", participant_id, e);
        }
        Ok(room.playback)
    }

    /// 現在の再生状態（ルームが存在しない場合は None）
    pub async fn current(&self, room_id: &RoomId) -> Option<PlaybackState> {
        self.rooms.find(room_id).await.map(|room| room.playback)
    }
}
