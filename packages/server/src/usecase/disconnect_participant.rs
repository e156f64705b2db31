//! UseCase: 参加者切断処理
//!
//! 明示的な切断とハートビートのタイムアウトの両方から呼ばれる。
//! 何度呼んでも安全で、2 回目以降は何もしない。
//! 切断した参加者がホストしていた live なルームは終了し、
//! ルームの参加者に `room-ended` を通知する。

use std::sync::Arc;

use listenhall_shared::{protocol::ServerFrame, time::Clock};

use crate::domain::{
    ConnectionRegistry, MessagePusher, ParticipantId, RoomId, RoomRepository, Timestamp,
};

use super::room_lifecycle::room_audience;

/// 切断処理の結果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisconnectOutcome {
    /// 接続が登録されていたか（false なら処理済み）
    pub removed: bool,
    /// 切断によって終了したルーム
    pub ended_rooms: Vec<RoomId>,
}

/// 参加者切断のユースケース
pub struct DisconnectParticipantUseCase {
    rooms: Arc<dyn RoomRepository>,
    registry: Arc<dyn ConnectionRegistry>,
    message_pusher: Arc<dyn MessagePusher>,
    clock: Arc<dyn Clock>,
}

impl DisconnectParticipantUseCase {
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

    /// 参加者切断を実行
    pub async fn execute(&self, participant_id: &ParticipantId) -> DisconnectOutcome {
        // 1. 接続と購読を削除
        let Some(_connection) = self.registry.remove(participant_id).await else {
            self.message_pusher.unregister_client(participant_id).await;
            return DisconnectOutcome::default();
        };

        // 2. 送信チャンネルを登録解除（ソケットのライターループが終了する）
        self.message_pusher.unregister_client(participant_id).await;

        // 3. ホストしていた live なルームを終了
        let now = Timestamp::new(self.clock.now_millis());
        let mut ended_rooms = Vec::new();
        for mut room in self.rooms.live_rooms_hosted_by(participant_id).await {
            if let Err(e) = room.end(participant_id, now) {
                tracing::warn!("Failed to end room '{}': {}", room.id, e);
                continue;
            }
            let room_id = room.id.clone();
            self.rooms.save(room).await;

            let frame = ServerFrame::RoomEnded {
                room_id: room_id.to_string(),
                host_id: participant_id.to_string(),
            };
            let targets = room_audience(self.registry.as_ref(), &room_id).await;
            if let Err(e) = self.message_pusher.broadcast(targets, &frame).await {
                tracing::warn!("Failed to broadcast room-ended for '{}': {}", room_id, e);
            }
            tracing::info!(
                "Room '{}' ended because host '{}' left",
                room_id,
                participant_id
            );
            ended_rooms.push(room_id);
        }

        DisconnectOutcome {
            removed: true,
            ended_rooms,
        }
    }
}
