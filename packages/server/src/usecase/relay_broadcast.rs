//! UseCase: チャンネルへのブロードキャスト中継
//!
//! ペイロードは解釈せず、保存もしない。送信者自身には配信しない。

use std::sync::Arc;

use listenhall_shared::protocol::ServerFrame;
use serde_json::Value;

use crate::domain::{ChannelName, ConnectionRegistry, MessagePusher, ParticipantId};

use super::error::RelayError;

/// ブロードキャスト中継のユースケース
pub struct RelayBroadcastUseCase {
    registry: Arc<dyn ConnectionRegistry>,
    message_pusher: Arc<dyn MessagePusher>,
}

impl RelayBroadcastUseCase {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        message_pusher: Arc<dyn MessagePusher>,
    ) -> Self {
        Self {
            registry,
            message_pusher,
        }
    }

    /// ブロードキャストを中継する
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<ParticipantId>)` - 配信対象（送信者を除くチャンネルの購読者）
    /// * `Err(RelayError::NotSubscribed)` - 送信者がチャンネルを購読していない
    pub async fn execute(
        &self,
        from: &ParticipantId,
        channel: &ChannelName,
        event: String,
        payload: Value,
    ) -> Result<Vec<ParticipantId>, RelayError> {
        if !self.registry.is_subscribed(from, channel).await {
            return Err(RelayError::NotSubscribed(channel.as_str().to_string()));
        }

        let targets: Vec<ParticipantId> = self
            .registry
            .subscribers(channel)
            .await
            .into_iter()
            .filter(|id| id != from)
            .collect();

        let frame = ServerFrame::Broadcast {
            channel: channel.as_str().to_string(),
            event,
            from: from.to_string(),
            payload,
        };
        self.message_pusher
            .broadcast(targets.clone(), &frame)
            .await
            .map_err(|e| RelayError::DeliveryFailed(e.to_string()))?;

        tracing::debug!(
            "Relayed broadcast from '{}' on '{}' to {} subscriber(s)",
            from,
            channel.as_str(),
            targets.len()
        );
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::message_pusher::MockMessagePusher,
        usecase::test_support::{Fixture, channel, participant},
    };
    use serde_json::json;

    async fn subscribe_all(fixture: &Fixture, ids: &[&str], name: &str) {
        for id in ids {
            fixture
                .registry
                .subscribe(&participant(id), channel(name))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        // テスト項目: ブロードキャストは送信者以外の購読者にだけ配信される
        // given (前提条件):
        let fixture = Fixture::new();
        let _host = fixture.connect("host").await;
        let _alice = fixture.connect("alice").await;
        let _bob = fixture.connect("bob").await;
        let _outsider = fixture.connect("outsider").await;
        subscribe_all(&fixture, &["host", "alice", "bob"], "room:party").await;

        let mut pusher = MockMessagePusher::new();
        pusher
            .expect_broadcast()
            .withf(|targets, frame| {
                targets == &vec![participant("alice"), participant("bob")]
                    && matches!(frame, ServerFrame::Broadcast { from, .. } if from == "host")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let usecase = RelayBroadcastUseCase::new(fixture.registry.clone(), Arc::new(pusher));

        // when (操作):
        let result = usecase
            .execute(
                &participant("host"),
                &channel("room:party"),
                "signal".to_string(),
                json!({"type": "offer"}),
            )
            .await;

        // then (期待する結果):
        assert_eq!(result.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_payload_is_relayed_verbatim() {
        // テスト項目: ペイロードがそのまま購読者に届く
        // given (前提条件):
        let fixture = Fixture::new();
        let _host = fixture.connect("host").await;
        let mut viewer_rx = fixture.connect("viewer").await;
        subscribe_all(&fixture, &["host", "viewer"], "room:party").await;
        let usecase = RelayBroadcastUseCase::new(fixture.registry.clone(), fixture.pusher.clone());
        let payload = json!({"type": "answer", "from": "host", "to": "viewer", "signal": {"sdp": "x"}});

        // when (操作):
        usecase
            .execute(
                &participant("host"),
                &channel("room:party"),
                "signal".to_string(),
                payload.clone(),
            )
            .await
            .unwrap();

        // then (期待する結果):
        let frame: ServerFrame = serde_json::from_str(&viewer_rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Broadcast {
                channel: "room:party".to_string(),
                event: "signal".to_string(),
                from: "host".to_string(),
                payload,
            }
        );
    }

    #[tokio::test]
    async fn test_broadcast_without_subscription_is_rejected() {
        // テスト項目: 購読していないチャンネルへのブロードキャストはエラー
        // given (前提条件):
        let fixture = Fixture::new();
        let _alice = fixture.connect("alice").await;
        let mut pusher = MockMessagePusher::new();
        pusher.expect_broadcast().times(0);
        let usecase = RelayBroadcastUseCase::new(fixture.registry.clone(), Arc::new(pusher));

        // when (操作):
        let result = usecase
            .execute(
                &participant("alice"),
                &channel("room:party"),
                "signal".to_string(),
                json!({}),
            )
            .await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(RelayError::NotSubscribed("room:party".to_string()))
        );
    }

    #[tokio::test]
    async fn test_broadcast_with_single_subscriber_has_no_targets() {
        // テスト項目: 送信者しか購読していない場合、配信対象は空
        // given (前提条件):
        let fixture = Fixture::new();
        let _alice = fixture.connect("alice").await;
        subscribe_all(&fixture, &["alice"], "room:solo").await;
        let usecase = RelayBroadcastUseCase::new(fixture.registry.clone(), fixture.pusher.clone());

        // when (操作):
        let result = usecase
            .execute(
                &participant("alice"),
                &channel("room:solo"),
                "signal".to_string(),
                json!({}),
            )
            .await;

        // then (期待する結果):
        assert_eq!(result, Ok(vec![]));
    }
}
