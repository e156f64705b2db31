//! WebSocket を使った MessagePusher 実装
//!
//! ## 責務
//!
//! - 接続ごとの `UnboundedSender` を管理
//! - `ServerFrame` を JSON にエンコードして送信（push_to, broadcast）
//!
//! ソケットの生成とライターループは UI 層（`ui/handler/websocket.rs`）が持ち、
//! この実装は受け取った sender にエンコード済みのフレームを流すだけです。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use listenhall_shared::protocol::ServerFrame;
use tokio::sync::Mutex;

use crate::domain::{MessagePushError, MessagePusher, ParticipantId, PusherChannel};

/// WebSocket を使った MessagePusher 実装
#[derive(Default)]
pub struct WebSocketMessagePusher {
    /// Key: participant_id, Value: ソケットライターへの sender
    clients: Arc<Mutex<HashMap<ParticipantId, PusherChannel>>>,
}

impl WebSocketMessagePusher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登録済みクライアント数
    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }
}

fn encode(frame: &ServerFrame) -> Result<String, MessagePushError> {
    serde_json::to_string(frame).map_err(|e| MessagePushError::Encode(e.to_string()))
}

#[async_trait]
impl MessagePusher for WebSocketMessagePusher {
    async fn register_client(&self, participant_id: ParticipantId, sender: PusherChannel) {
        let mut clients = self.clients.lock().await;
        tracing::debug!("Client '{}' registered to MessagePusher", participant_id);
        clients.insert(participant_id, sender);
    }

    async fn unregister_client(&self, participant_id: &ParticipantId) {
        let mut clients = self.clients.lock().await;
        clients.remove(participant_id);
        tracing::debug!("Client '{}' unregistered from MessagePusher", participant_id);
    }

    async fn push_to(
        &self,
        participant_id: &ParticipantId,
        frame: &ServerFrame,
    ) -> Result<(), MessagePushError> {
        let content = encode(frame)?;
        let clients = self.clients.lock().await;

        let sender = clients
            .get(participant_id)
            .ok_or_else(|| MessagePushError::ClientNotFound(participant_id.to_string()))?;
        sender
            .send(content)
            .map_err(|e| MessagePushError::PushFailed(e.to_string()))?;
        tracing::debug!("Pushed frame to client '{}'", participant_id);
        Ok(())
    }

    async fn broadcast(
        &self,
        targets: Vec<ParticipantId>,
        frame: &ServerFrame,
    ) -> Result<(), MessagePushError> {
        let content = encode(frame)?;
        let clients = self.clients.lock().await;

        for target in targets {
            let Some(sender) = clients.get(&target) else {
                tracing::warn!("Client '{}' not found during broadcast, skipping", target);
                continue;
            };
            // ブロードキャストでは一部の送信失敗を許容
            if let Err(e) = sender.send(content.clone()) {
                tracing::warn!("Failed to push frame to client '{}': {}", target, e);
            } else {
                tracing::debug!("Broadcasted frame to client '{}'", target);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn participant(id: &str) -> ParticipantId {
        ParticipantId::new(id.to_string()).unwrap()
    }

    fn frame() -> ServerFrame {
        ServerFrame::RoomEnded {
            room_id: "party".to_string(),
            host_id: "host".to_string(),
        }
    }

    #[tokio::test]
    async fn test_push_to_success() {
        // テスト項目: 特定のクライアントにフレームを JSON で送信できる
        // given (前提条件):
        let pusher = WebSocketMessagePusher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        pusher.register_client(participant("alice"), tx).await;

        // when (操作):
        let result = pusher.push_to(&participant("alice"), &frame()).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert_eq!(
            rx.recv().await,
            Some(r#"{"type":"room-ended","room_id":"party"}"#.to_string())
        );
    }

    #[tokio::test]
    async fn test_push_to_client_not_found() {
        // テスト項目: 存在しないクライアントへの送信はエラーを返す
        // given (前提条件):
        let pusher = WebSocketMessagePusher::new();

        // when (操作):
        let result = pusher.push_to(&participant("nonexistent"), &frame()).await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(MessagePushError::ClientNotFound("nonexistent".to_string()))
        );
    }

    #[tokio::test]
    async fn test_push_to_closed_channel_fails() {
        // テスト項目: 受信側が閉じたクライアントへの送信は PushFailed になる
        // given (前提条件):
        let pusher = WebSocketMessagePusher::new();
        let (tx, rx) = mpsc::unbounded_channel();
        pusher.register_client(participant("alice"), tx).await;
        drop(rx);

        // when (操作):
        let result = pusher.push_to(&participant("alice"), &frame()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(MessagePushError::PushFailed(_))));
    }

    #[tokio::test]
    async fn test_broadcast_partial_failure() {
        // テスト項目: ブロードキャスト時、一部のクライアントが存在しなくても成功する
        // given (前提条件):
        let pusher = WebSocketMessagePusher::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        pusher.register_client(participant("alice"), tx1).await;
        pusher.register_client(participant("bob"), tx2).await;

        // when (操作):
        let targets = vec![participant("alice"), participant("ghost"), participant("bob")];
        let result = pusher.broadcast(targets, &frame()).await;

        // then (期待する結果):
        assert!(result.is_ok());
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unregister_client() {
        // テスト項目: 登録解除したクライアントには送信できない
        // given (前提条件):
        let pusher = WebSocketMessagePusher::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        pusher.register_client(participant("alice"), tx).await;

        // when (操作):
        pusher.unregister_client(&participant("alice")).await;

        // then (期待する結果):
        assert_eq!(pusher.client_count().await, 0);
        assert!(pusher.push_to(&participant("alice"), &frame()).await.is_err());
    }
}
