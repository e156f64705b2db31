//! UseCase: 参加者接続処理
//!
//! - 同じ participant_id の二重接続を拒否する
//! - 接続を ConnectionRegistry に登録し、送信用チャンネルを MessagePusher に登録する

use std::sync::Arc;

use listenhall_shared::time::Clock;

use crate::domain::{
    Connection, ConnectionRegistry, MessagePusher, ParticipantId, PusherChannel,
    RepositoryError, Timestamp,
};

use super::error::ConnectError;

/// 参加者接続のユースケース
pub struct ConnectParticipantUseCase {
    registry: Arc<dyn ConnectionRegistry>,
    message_pusher: Arc<dyn MessagePusher>,
    clock: Arc<dyn Clock>,
}

impl ConnectParticipantUseCase {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        message_pusher: Arc<dyn MessagePusher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            message_pusher,
            clock,
        }
    }

    /// 参加者接続を実行
    ///
    /// # Returns
    ///
    /// * `Ok(Timestamp)` - 接続時刻
    /// * `Err(ConnectError)` - 同じ ID の参加者がすでに接続している
    pub async fn execute(
        &self,
        participant_id: ParticipantId,
        sender: PusherChannel,
    ) -> Result<Timestamp, ConnectError> {
        let connected_at = Timestamp::new(self.clock.now_millis());

        self.registry
            .add(Connection::new(participant_id.clone(), connected_at))
            .await
            .map_err(|e| match e {
                RepositoryError::DuplicateParticipant(id)
                | RepositoryError::ParticipantNotFound(id) => {
                    ConnectError::DuplicateParticipant(id)
                }
            })?;

        self.message_pusher
            .register_client(participant_id, sender)
            .await;

        Ok(connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::test_support::{Fixture, participant};
    use listenhall_shared::protocol::ServerFrame;

    fn usecase(fixture: &Fixture) -> ConnectParticipantUseCase {
        ConnectParticipantUseCase::new(
            fixture.registry.clone(),
            fixture.pusher.clone(),
            Arc::new(fixture.clock.clone()),
        )
    }

    #[tokio::test]
    async fn test_connect_participant_success() {
        // テスト項目: 新規参加者が正常に接続でき、フレームを受け取れる
        // given (前提条件):
        let fixture = Fixture::new();
        let usecase = usecase(&fixture);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        // when (操作):
        let result = usecase.execute(participant("alice"), tx).await;

        // then (期待する結果):
        assert_eq!(result, Ok(Timestamp::new(1_000)));
        assert!(fixture.registry.contains(&participant("alice")).await);
        fixture
            .pusher
            .push_to(&participant("alice"), &ServerFrame::HeartbeatAck)
            .await
            .unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_connect_participant_duplicate_error() {
        // テスト項目: 重複した participant_id での接続試行がエラーになる
        // given (前提条件):
        let fixture = Fixture::new();
        let usecase = usecase(&fixture);
        let (tx1, _rx1) = tokio::sync::mpsc::unbounded_channel();
        usecase.execute(participant("alice"), tx1).await.unwrap();

        // when (操作):
        let (tx2, _rx2) = tokio::sync::mpsc::unbounded_channel();
        let result = usecase.execute(participant("alice"), tx2).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(ConnectError::DuplicateParticipant("alice".to_string()))
        );
        assert_eq!(fixture.registry.count().await, 1);
    }
}
