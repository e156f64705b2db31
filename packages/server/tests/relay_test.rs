//! End-to-end tests of the relay server over real sockets.
//!
//! Each test binds an in-process server on an ephemeral port and talks to it
//! with `tokio-tungstenite` and `reqwest`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use listenhall_server::ui::{AppState, Server};
use listenhall_shared::{
    protocol::{ClientFrame, ClientRequest, ErrorCode, PlaybackState, RoomStatus, ServerFrame},
    time::SystemClock,
};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::in_memory(
        Arc::new(SystemClock),
        Duration::from_secs(30),
    ));
    let server = Server::new(state, Duration::from_secs(5));
    tokio::spawn(server.serve_with_shutdown(listener, std::future::pending()));
    addr
}

async fn connect(addr: SocketAddr, participant_id: &str) -> Socket {
    let url = format!("ws://{}/ws?participant_id={}", addr, participant_id);
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let welcome = recv(&mut socket).await;
    assert_eq!(
        welcome,
        ServerFrame::Connected {
            participant_id: participant_id.to_string()
        }
    );
    socket
}

async fn send(socket: &mut Socket, frame: ClientFrame) {
    let text = serde_json::to_string(&frame).unwrap();
    socket.send(Message::text(text)).await.unwrap();
}

async fn send_request(socket: &mut Socket, request_id: u64, frame: ClientFrame) {
    let text = serde_json::to_string(&ClientRequest::new(request_id, frame)).unwrap();
    socket.send(Message::text(text)).await.unwrap();
}

async fn recv(socket: &mut Socket) -> ServerFrame {
    let msg = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("timed out waiting for a frame")
        .unwrap()
        .unwrap();
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

async fn assert_silent(socket: &mut Socket) {
    let result = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}

async fn subscribe(socket: &mut Socket, channel: &str) {
    send(
        socket,
        ClientFrame::Subscribe {
            channel: channel.to_string(),
        },
    )
    .await;
    assert_eq!(
        recv(socket).await,
        ServerFrame::Subscribed {
            channel: channel.to_string()
        }
    );
}

#[tokio::test]
async fn test_duplicate_participant_is_rejected_with_conflict() {
    // テスト項目: 同じ participant_id の二重接続は 409 で拒否される
    // given (前提条件):
    let addr = start_server().await;
    let _alice = connect(addr, "alice").await;

    // when (操作):
    let url = format!("ws://{}/ws?participant_id=alice", addr);
    let result = tokio_tungstenite::connect_async(url).await;

    // then (期待する結果):
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 409);
        }
        other => panic!("expected HTTP 409, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_invalid_participant_id_is_rejected() {
    // テスト項目: 不正な participant_id の接続は 400 で拒否される
    let addr = start_server().await;
    let url = format!("ws://{}/ws?participant_id=bad%20id", addr);
    match tokio_tungstenite::connect_async(url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 400);
        }
        other => panic!("expected HTTP 400, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_broadcast_reaches_other_subscribers_but_not_sender() {
    // テスト項目: ブロードキャストは送信者以外の購読者に届き、送信者には戻らない
    // given (前提条件):
    let addr = start_server().await;
    let mut host = connect(addr, "host").await;
    let mut viewer = connect(addr, "viewer").await;
    subscribe(&mut host, "room:party").await;
    subscribe(&mut viewer, "room:party").await;
    let payload = json!({"type": "offer", "from": "viewer", "signal": {"sdp": "v=0"}});

    // when (操作):
    send(
        &mut viewer,
        ClientFrame::Broadcast {
            channel: "room:party".to_string(),
            event: "signal".to_string(),
            payload: payload.clone(),
        },
    )
    .await;

    // then (期待する結果):
    assert_eq!(
        recv(&mut host).await,
        ServerFrame::Broadcast {
            channel: "room:party".to_string(),
            event: "signal".to_string(),
            from: "viewer".to_string(),
            payload,
        }
    );
    assert_silent(&mut viewer).await;
}

#[tokio::test]
async fn test_viewer_playback_write_is_rejected() {
    // テスト項目: 視聴者による再生状態の書き込みは state-write-rejected で拒否される
    // given (前提条件):
    let addr = start_server().await;
    let mut host = connect(addr, "host").await;
    let mut viewer = connect(addr, "viewer").await;
    send(
        &mut host,
        ClientFrame::StartRoom {
            room_id: "party".to_string(),
        },
    )
    .await;
    assert!(matches!(
        recv(&mut host).await,
        ServerFrame::RoomStarted { .. }
    ));

    // when (操作):
    send_request(
        &mut viewer,
        41,
        ClientFrame::UpsertPlayback {
            room_id: "party".to_string(),
            state: PlaybackState::new(Some("track-9".to_string()), 1_000, true, 1),
        },
    )
    .await;

    // then (期待する結果):
    match recv(&mut viewer).await {
        ServerFrame::Error {
            code, request_id, ..
        } => {
            assert_eq!(code, ErrorCode::StateWriteRejected);
            assert_eq!(request_id, Some(41));
        }
        other => panic!("unexpected frame: {:?}", other),
    }
    let playback: PlaybackState =
        reqwest::get(format!("http://{}/api/rooms/party/playback", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(playback, PlaybackState::empty());
}

#[tokio::test]
async fn test_watchers_receive_host_playback_updates() {
    // テスト項目: 監視している視聴者にホストの再生状態が届く
    // given (前提条件):
    let addr = start_server().await;
    let mut host = connect(addr, "host").await;
    let mut viewer = connect(addr, "viewer").await;
    send(
        &mut host,
        ClientFrame::StartRoom {
            room_id: "party".to_string(),
        },
    )
    .await;
    recv(&mut host).await;
    send(
        &mut viewer,
        ClientFrame::WatchPlayback {
            room_id: "party".to_string(),
        },
    )
    .await;
    assert_eq!(
        recv(&mut viewer).await,
        ServerFrame::PlaybackChanged {
            room_id: "party".to_string(),
            state: PlaybackState::empty(),
        }
    );
    let state = PlaybackState::new(Some("track-1".to_string()), 15_000, true, 100_000);

    // when (操作):
    send(
        &mut host,
        ClientFrame::UpsertPlayback {
            room_id: "party".to_string(),
            state: state.clone(),
        },
    )
    .await;

    // then (期待する結果):
    assert_eq!(
        recv(&mut viewer).await,
        ServerFrame::PlaybackChanged {
            room_id: "party".to_string(),
            state,
        }
    );
    assert_eq!(
        recv(&mut host).await,
        ServerFrame::PlaybackStored {
            room_id: "party".to_string(),
        }
    );
}

#[tokio::test]
async fn test_write_to_unknown_room_is_rejected_with_request_id() {
    // テスト項目: 存在しないルームへの書き込みは、リクエスト ID 付きの room-not-found で拒否される
    // given (前提条件):
    let addr = start_server().await;
    let mut host = connect(addr, "host").await;

    // when (操作):
    send_request(
        &mut host,
        7,
        ClientFrame::UpsertPlayback {
            room_id: "old".to_string(),
            state: PlaybackState::new(Some("track-1".to_string()), 0, true, 1),
        },
    )
    .await;

    // then (期待する結果):
    match recv(&mut host).await {
        ServerFrame::Error {
            code, request_id, ..
        } => {
            assert_eq!(code, ErrorCode::RoomNotFound);
            assert_eq!(request_id, Some(7));
        }
        other => panic!("unexpected frame: {:?}", other),
    }
}

#[tokio::test]
async fn test_host_disconnect_ends_room() {
    // テスト項目: ホストが切断するとルームが終了し、視聴者に通知される
    // given (前提条件):
    let addr = start_server().await;
    let mut host = connect(addr, "host").await;
    let mut viewer = connect(addr, "viewer").await;
    send(
        &mut host,
        ClientFrame::StartRoom {
            room_id: "party".to_string(),
        },
    )
    .await;
    recv(&mut host).await;
    subscribe(&mut viewer, "room:party").await;

    // when (操作):
    host.close(None).await.unwrap();

    // then (期待する結果):
    assert_eq!(
        recv(&mut viewer).await,
        ServerFrame::RoomEnded {
            room_id: "party".to_string(),
            host_id: "host".to_string(),
        }
    );
    let detail: serde_json::Value = reqwest::get(format!("http://{}/api/rooms/party", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["status"], json!(RoomStatus::Ended));
}

#[tokio::test]
async fn test_describe_room_reports_host() {
    // テスト項目: describe-room でホストの ID がわかる
    // given (前提条件):
    let addr = start_server().await;
    let mut host = connect(addr, "host").await;
    let mut viewer = connect(addr, "viewer").await;
    send(
        &mut host,
        ClientFrame::StartRoom {
            room_id: "party".to_string(),
        },
    )
    .await;
    recv(&mut host).await;

    // when (操作):
    send(
        &mut viewer,
        ClientFrame::DescribeRoom {
            room_id: "party".to_string(),
        },
    )
    .await;

    // then (期待する結果):
    assert_eq!(
        recv(&mut viewer).await,
        ServerFrame::RoomInfo {
            room_id: "party".to_string(),
            host_id: "host".to_string(),
            status: RoomStatus::Live,
        }
    );
}

#[tokio::test]
async fn test_health_and_unknown_room_endpoints() {
    // テスト項目: ヘルスチェックは 200、存在しないルームは 404
    let addr = start_server().await;
    let health = reqwest::get(format!("http://{}/api/health", addr))
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);
    let missing = reqwest::get(format!("http://{}/api/rooms/nope/playback", addr))
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}
