//! WebSocket connection to the relay server.
//!
//! One socket carries every channel subscription, the room commands and the
//! playback record traffic. Every frame carries a request id. Commands that
//! expect an answer are issued one at a time and matched against the next
//! fitting frame; a rejection settles the command only when it echoes the
//! command's id. Pushes (channel broadcasts, playback changes) are routed to
//! their subscribers as they arrive. A `room-ended` push reaches the room's
//! signaling subscribers as a `bye` from the host. Losing the socket closes
//! every subscription.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use listenhall_shared::protocol::{
    ClientFrame, ClientRequest, PlaybackState, RoomStatus, SIGNAL_EVENT, ServerFrame, SignalKind,
    SignalMessage, signal_channel,
};
use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::protocol::Message};

use super::{
    ChannelEvent, ChannelSubscription, ChannelTransport, RoomDirectory, RoomInfo, TransportError,
};
use crate::sync::PlaybackStore;

/// How long an acknowledged command may wait for its answer
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Period of the keep-alive frame
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Answer a pending command is waiting for
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expect {
    Subscribed(String),
    Unsubscribed(String),
    RoomStarted(String),
    RoomEnded(String),
    RoomInfo(String),
    Playback(String),
    PlaybackStored(String),
}

impl Expect {
    fn matches(&self, frame: &ServerFrame) -> bool {
        match (self, frame) {
            (Expect::Subscribed(want), ServerFrame::Subscribed { channel })
            | (Expect::Unsubscribed(want), ServerFrame::Unsubscribed { channel }) => {
                want == channel
            }
            (Expect::RoomStarted(want), ServerFrame::RoomStarted { room_id, .. })
            | (Expect::RoomEnded(want), ServerFrame::RoomEnded { room_id, .. })
            | (Expect::RoomInfo(want), ServerFrame::RoomInfo { room_id, .. })
            | (Expect::Playback(want), ServerFrame::PlaybackChanged { room_id, .. })
            | (Expect::PlaybackStored(want), ServerFrame::PlaybackStored { room_id }) => {
                want == room_id
            }
            _ => false,
        }
    }
}

struct Pending {
    request_id: u64,
    expect: Expect,
    reply: oneshot::Sender<Result<ServerFrame, TransportError>>,
}

#[derive(Default)]
struct Routes {
    channels: HashMap<String, mpsc::UnboundedSender<ChannelEvent>>,
    playback: HashMap<String, Vec<mpsc::UnboundedSender<PlaybackState>>>,
    pending: Option<Pending>,
}

struct Inner {
    participant_id: String,
    outbound: mpsc::UnboundedSender<Message>,
    routes: Mutex<Routes>,
    /// Serializes commands that wait for an answer
    command: Mutex<()>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    request_timeout: Duration,
    next_request_id: AtomicU64,
}

impl Inner {
    fn new(
        participant_id: &str,
        outbound: mpsc::UnboundedSender<Message>,
        closed_tx: watch::Sender<bool>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            outbound,
            routes: Mutex::new(Routes::default()),
            command: Mutex::new(()),
            closed: AtomicBool::new(false),
            closed_tx,
            request_timeout,
            next_request_id: AtomicU64::new(1),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue a frame that expects no answer
    fn push(&self, frame: ClientFrame) -> Result<(), TransportError> {
        self.send_frame(self.next_request_id(), frame)
    }

    fn send_frame(&self, request_id: u64, frame: ClientFrame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_string(&ClientRequest::new(request_id, frame))
            .map_err(|e| TransportError::Encode(e.to_string()))?;
        self.outbound
            .send(Message::text(json))
            .map_err(|_| TransportError::Closed)
    }

    async fn request(
        &self,
        frame: ClientFrame,
        expect: Expect,
    ) -> Result<ServerFrame, TransportError> {
        let _command = self.command.lock().await;
        let request_id = self.next_request_id();
        let (reply, answer) = oneshot::channel();
        self.routes.lock().await.pending = Some(Pending {
            request_id,
            expect,
            reply,
        });
        if let Err(e) = self.send_frame(request_id, frame) {
            self.routes.lock().await.pending = None;
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.routes.lock().await.pending = None;
                Err(TransportError::Timeout)
            }
        }
    }

    async fn route(&self, frame: ServerFrame) {
        let mut routes = self.routes.lock().await;

        match &frame {
            ServerFrame::Broadcast {
                channel,
                event,
                from,
                payload,
            } => {
                let delivered = routes.channels.get(channel).map(|tx| {
                    tx.send(ChannelEvent {
                        event: event.clone(),
                        from: from.clone(),
                        payload: payload.clone(),
                    })
                    .is_ok()
                });
                match delivered {
                    Some(true) => {}
                    Some(false) => {
                        routes.channels.remove(channel);
                    }
                    None => tracing::debug!("Dropping broadcast on unsubscribed '{}'", channel),
                }
                return;
            }
            ServerFrame::PlaybackChanged { room_id, state } => {
                if let Some(watchers) = routes.playback.get_mut(room_id) {
                    watchers.retain(|tx| tx.send(state.clone()).is_ok());
                }
            }
            ServerFrame::Error {
                code,
                message,
                request_id,
            } => {
                let answers_pending = request_id.is_some_and(|id| {
                    routes
                        .pending
                        .as_ref()
                        .is_some_and(|pending| pending.request_id == id)
                });
                if answers_pending && let Some(pending) = routes.pending.take() {
                    let _ = pending.reply.send(Err(TransportError::Rejected {
                        code: *code,
                        message: message.clone(),
                    }));
                } else {
                    tracing::warn!(
                        "Relay rejected frame {:?} ({:?}): {}",
                        request_id,
                        code,
                        message
                    );
                }
                return;
            }
            ServerFrame::RoomEnded { room_id, host_id } => {
                tracing::info!("Room '{}' ended", room_id);
                let channel = signal_channel(room_id);
                let bye = SignalMessage::broadcast(SignalKind::Bye, host_id, Value::Null);
                if let (Some(tx), Ok(payload)) =
                    (routes.channels.get(&channel), serde_json::to_value(bye))
                {
                    let _ = tx.send(ChannelEvent {
                        event: SIGNAL_EVENT.to_string(),
                        from: host_id.clone(),
                        payload,
                    });
                }
            }
            ServerFrame::Connected { participant_id } => {
                tracing::debug!("Relay session opened for '{}'", participant_id);
                return;
            }
            ServerFrame::HeartbeatAck => return,
            _ => {}
        }

        if routes
            .pending
            .as_ref()
            .is_some_and(|pending| pending.expect.matches(&frame))
            && let Some(pending) = routes.pending.take()
        {
            let _ = pending.reply.send(Ok(frame));
        }
    }

    /// Mark the connection lost and release every subscriber
    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut routes = self.routes.lock().await;
        routes.channels.clear();
        routes.playback.clear();
        if let Some(pending) = routes.pending.take() {
            let _ = pending.reply.send(Err(TransportError::Closed));
        }
        let _ = self.closed_tx.send(true);
    }
}

/// Aborts the socket tasks once the last handle is dropped
struct Tasks(Vec<JoinHandle<()>>);

impl Drop for Tasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Client side of the relay WebSocket.
///
/// Implements [`ChannelTransport`], [`RoomDirectory`] and [`PlaybackStore`]
/// over a single connection. Cloning shares the connection.
#[derive(Clone)]
pub struct RelayConnection {
    inner: Arc<Inner>,
    closed_rx: watch::Receiver<bool>,
    _tasks: Arc<Tasks>,
}

impl RelayConnection {
    /// Open a connection to `url` (e.g. `ws://127.0.0.1:8080/ws`) as `participant_id`.
    ///
    /// # Errors
    ///
    /// [`TransportError::DuplicateParticipant`] when the identity is already
    /// connected, [`TransportError::Connect`] for any other handshake failure.
    pub async fn connect(url: &str, participant_id: &str) -> Result<Self, TransportError> {
        Self::connect_with_timeout(url, participant_id, REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(
        url: &str,
        participant_id: &str,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = format!("{}?participant_id={}", url, participant_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| match e {
            tungstenite::Error::Http(response) if response.status().as_u16() == 409 => {
                TransportError::DuplicateParticipant(participant_id.to_string())
            }
            other => TransportError::Connect(other.to_string()),
        })?;
        tracing::info!("Connected to relay as '{}'", participant_id);

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (closed_tx, closed_rx) = watch::channel(false);

        let inner = Arc::new(Inner::new(
            participant_id,
            outbound,
            closed_tx,
            request_timeout,
        ));

        // Writer: drain the outbound queue into the socket
        let writer_inner = inner.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    tracing::warn!("Failed to send frame: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
            writer_inner.shutdown().await;
        });

        // Reader: route server frames until the socket goes away
        let reader_inner = inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => reader_inner.route(frame).await,
                        Err(e) => tracing::warn!("Unparsable frame from relay: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            reader_inner.shutdown().await;
        });

        let heartbeat_inner = inner.clone();
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if heartbeat_inner.push(ClientFrame::Heartbeat).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            inner,
            closed_rx,
            _tasks: Arc::new(Tasks(vec![writer, reader, heartbeat])),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolve once the connection is lost or closed
    pub async fn closed(&self) {
        let mut closed_rx = self.closed_rx.clone();
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }

    /// Close the socket gracefully
    pub fn close(&self) {
        let _ = self.inner.outbound.send(Message::Close(None));
    }
}

#[async_trait]
impl ChannelTransport for RelayConnection {
    fn participant_id(&self) -> &str {
        &self.inner.participant_id
    }

    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Registered first so nothing sent right after the ack is lost
        self.inner
            .routes
            .lock()
            .await
            .channels
            .insert(channel.to_string(), tx);

        let result = self
            .inner
            .request(
                ClientFrame::Subscribe {
                    channel: channel.to_string(),
                },
                Expect::Subscribed(channel.to_string()),
            )
            .await;
        if let Err(e) = result {
            self.inner.routes.lock().await.channels.remove(channel);
            return Err(e);
        }

        tracing::debug!("Subscribed to '{}'", channel);
        Ok(ChannelSubscription {
            channel: channel.to_string(),
            events: rx,
        })
    }

    async fn send(&self, channel: &str, event: &str, payload: Value) -> Result<(), TransportError> {
        self.inner.push(ClientFrame::Broadcast {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
        })
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.inner.routes.lock().await.channels.remove(channel);
        self.inner
            .request(
                ClientFrame::Unsubscribe {
                    channel: channel.to_string(),
                },
                Expect::Unsubscribed(channel.to_string()),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for RelayConnection {
    async fn start_room(&self, room_id: &str) -> Result<RoomInfo, TransportError> {
        let frame = self
            .inner
            .request(
                ClientFrame::StartRoom {
                    room_id: room_id.to_string(),
                },
                Expect::RoomStarted(room_id.to_string()),
            )
            .await?;
        match frame {
            ServerFrame::RoomStarted { room_id, host_id } => Ok(RoomInfo {
                room_id,
                host_id,
                status: RoomStatus::Live,
            }),
            other => Err(TransportError::Connect(format!(
                "unexpected answer to start-room: {:?}",
                other
            ))),
        }
    }

    async fn end_room(&self, room_id: &str) -> Result<(), TransportError> {
        self.inner
            .request(
                ClientFrame::EndRoom {
                    room_id: room_id.to_string(),
                },
                Expect::RoomEnded(room_id.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn describe_room(&self, room_id: &str) -> Result<RoomInfo, TransportError> {
        let frame = self
            .inner
            .request(
                ClientFrame::DescribeRoom {
                    room_id: room_id.to_string(),
                },
                Expect::RoomInfo(room_id.to_string()),
            )
            .await?;
        match frame {
            ServerFrame::RoomInfo {
                room_id,
                host_id,
                status,
            } => Ok(RoomInfo {
                room_id,
                host_id,
                status,
            }),
            other => Err(TransportError::Connect(format!(
                "unexpected answer to describe-room: {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl PlaybackStore for RelayConnection {
    /// Resolves once the relay stored the row or rejected the write
    async fn upsert(&self, room_id: &str, state: PlaybackState) -> Result<(), TransportError> {
        self.inner
            .request(
                ClientFrame::UpsertPlayback {
                    room_id: room_id.to_string(),
                    state,
                },
                Expect::PlaybackStored(room_id.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn watch(
        &self,
        room_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<PlaybackState>, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .routes
            .lock()
            .await
            .playback
            .entry(room_id.to_string())
            .or_default()
            .push(tx);

        // The relay answers with the current row, which the route above delivers
        self.inner
            .request(
                ClientFrame::WatchPlayback {
                    room_id: room_id.to_string(),
                },
                Expect::Playback(room_id.to_string()),
            )
            .await?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use listenhall_shared::protocol::ErrorCode;

    use super::*;

    /// Connection without a socket; frames queued for the relay land in the receiver
    fn detached() -> (RelayConnection, mpsc::UnboundedReceiver<Message>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let inner = Arc::new(Inner::new("host", outbound, closed_tx, REQUEST_TIMEOUT));
        (
            RelayConnection {
                inner,
                closed_rx,
                _tasks: Arc::new(Tasks(Vec::new())),
            },
            outbound_rx,
        )
    }

    async fn sent_request(outbound: &mut mpsc::UnboundedReceiver<Message>) -> ClientRequest {
        let message = outbound.recv().await.unwrap();
        serde_json::from_str(message.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_unrelated_rejection_does_not_settle_pending_command() {
        // テスト項目: 別のリクエストへの拒否は、待機中の subscribe を失敗させない
        // given (前提条件):
        let (connection, mut outbound) = detached();
        let pending = tokio::spawn({
            let connection = connection.clone();
            async move {
                connection
                    .subscribe("room:party")
                    .await
                    .map(|subscription| subscription.channel)
            }
        });
        let request = sent_request(&mut outbound).await;
        let request_id = request.request_id.unwrap();

        // when (操作):
        connection
            .inner
            .route(ServerFrame::Error {
                code: ErrorCode::RoomNotFound,
                message: "room 'old' not found".to_string(),
                request_id: Some(request_id + 100),
            })
            .await;
        connection
            .inner
            .route(ServerFrame::Error {
                code: ErrorCode::InvalidFrame,
                message: "delivery failed".to_string(),
                request_id: None,
            })
            .await;
        connection
            .inner
            .route(ServerFrame::Subscribed {
                channel: "room:party".to_string(),
            })
            .await;

        // then (期待する結果):
        let result = pending.await.unwrap();
        assert!(matches!(result, Ok(ref channel) if channel == "room:party"));
    }

    #[tokio::test]
    async fn test_rejected_playback_write_surfaces_as_error() {
        // テスト項目: リレーに拒否された再生状態の書き込みは Rejected として返る
        // given (前提条件):
        let (connection, mut outbound) = detached();
        let pending = tokio::spawn({
            let connection = connection.clone();
            async move { connection.upsert("old", PlaybackState::empty()).await }
        });
        let request = sent_request(&mut outbound).await;
        assert!(matches!(request.frame, ClientFrame::UpsertPlayback { .. }));

        // when (操作):
        connection
            .inner
            .route(ServerFrame::Error {
                code: ErrorCode::RoomNotFound,
                message: "room 'old' not found".to_string(),
                request_id: request.request_id,
            })
            .await;

        // then (期待する結果):
        assert!(matches!(
            pending.await.unwrap(),
            Err(TransportError::Rejected {
                code: ErrorCode::RoomNotFound,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_accepted_playback_write_is_acknowledged() {
        // テスト項目: playback-stored の応答で書き込みが完了する
        let (connection, mut outbound) = detached();
        let pending = tokio::spawn({
            let connection = connection.clone();
            async move { connection.upsert("party", PlaybackState::empty()).await }
        });
        sent_request(&mut outbound).await;
        connection
            .inner
            .route(ServerFrame::PlaybackStored {
                room_id: "party".to_string(),
            })
            .await;
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_room_end_reaches_signaling_as_bye_from_host() {
        // テスト項目: room-ended はシグナリングの購読者にホストからの bye として届く
        // given (前提条件):
        let (connection, _outbound) = detached();
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection
            .inner
            .routes
            .lock()
            .await
            .channels
            .insert("room:party".to_string(), tx);

        // when (操作):
        connection
            .inner
            .route(ServerFrame::RoomEnded {
                room_id: "party".to_string(),
                host_id: "dj".to_string(),
            })
            .await;

        // then (期待する結果):
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, SIGNAL_EVENT);
        assert_eq!(event.from, "dj");
        let message: SignalMessage = serde_json::from_value(event.payload).unwrap();
        assert_eq!(message.r#type, SignalKind::Bye);
        assert_eq!(message.from, "dj");
        assert_eq!(message.to, None);
    }

    #[test]
    fn test_expect_matches_only_the_named_target() {
        // テスト項目: 待機中のコマンドは対象が一致する応答にだけ対応する
        // given (前提条件):
        let expect = Expect::Subscribed("room:a".to_string());

        // when (操作):
        let same = ServerFrame::Subscribed {
            channel: "room:a".to_string(),
        };
        let other = ServerFrame::Subscribed {
            channel: "room:b".to_string(),
        };

        // then (期待する結果):
        assert!(expect.matches(&same));
        assert!(!expect.matches(&other));
        assert!(!expect.matches(&ServerFrame::HeartbeatAck));
    }

    #[test]
    fn test_room_info_expectation() {
        // テスト項目: describe-room の応答は room-info で対応付けられる
        let expect = Expect::RoomInfo("party".to_string());
        assert!(expect.matches(&ServerFrame::RoomInfo {
            room_id: "party".to_string(),
            host_id: "host".to_string(),
            status: RoomStatus::Live,
        }));
        assert!(!expect.matches(&ServerFrame::RoomStarted {
            room_id: "party".to_string(),
            host_id: "host".to_string(),
        }));
    }
}
