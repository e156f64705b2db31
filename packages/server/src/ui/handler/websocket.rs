//! WebSocket connection handlers.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use listenhall_shared::protocol::{ClientFrame, ClientRequest, ErrorCode, ServerFrame};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    domain::{ChannelName, ParticipantId, RoomId},
    ui::state::AppState,
    usecase::{ConnectError, PlaybackError, RelayError, RoomCommandError},
};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub participant_id: String,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let participant_id = match ParticipantId::try_from(query.participant_id.clone()) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Invalid participant_id '{}': {}", query.participant_id, e);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    // Channel carrying encoded frames to this connection's socket writer
    let (tx, rx) = mpsc::unbounded_channel();

    match state
        .connect_participant_usecase
        .execute(participant_id.clone(), tx)
        .await
    {
        Ok(_connected_at) => {
            tracing::info!("Participant '{}' connected", participant_id);
            Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, participant_id, rx)))
        }
        Err(ConnectError::DuplicateParticipant(_)) => {
            tracing::warn!(
                "Participant '{}' is already connected. Rejecting connection.",
                participant_id
            );
            Err(StatusCode::CONFLICT)
        }
    }
}

/// Forwards encoded frames from `rx` to the socket until either side closes.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    })
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    participant_id: ParticipantId,
    rx: mpsc::UnboundedReceiver<String>,
) {
    let (sender, mut receiver) = socket.split();
    let mut send_task = pusher_loop(rx, sender);

    let welcome = ServerFrame::Connected {
        participant_id: participant_id.to_string(),
    };
    if let Err(e) = state.message_pusher.push_to(&participant_id, &welcome).await {
        tracing::warn!("Failed to greet '{}': {}", participant_id, e);
    }

    let state_clone = state.clone();
    let id_clone = participant_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!("WebSocket error from '{}': {}", id_clone, e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    state_clone.presence_usecase.touch(&id_clone).await;
                    let reply = match serde_json::from_str::<ClientRequest>(&text) {
                        Ok(request) => dispatch(&state_clone, &id_clone, request.frame)
                            .await
                            .map(|reply| reply.answering(request.request_id)),
                        Err(e) => {
                            tracing::warn!("Malformed frame from '{}': {}", id_clone, e);
                            Some(error_frame(ErrorCode::InvalidFrame, e))
                        }
                    };
                    if let Some(reply) = reply
                        && let Err(e) = state_clone.message_pusher.push_to(&id_clone, &reply).await
                    {
                        tracing::warn!("Failed to reply to '{}': {}", id_clone, e);
                    }
                }
                Message::Ping(_) | Message::Pong(_) => {
                    state_clone.presence_usecase.touch(&id_clone).await;
                }
                Message::Close(_) => {
                    tracing::info!("Participant '{}' requested close", id_clone);
                    break;
                }
                Message::Binary(_) => {
                    tracing::debug!("Ignoring binary frame from '{}'", id_clone);
                }
            }
        }
    });

    // If any one of the tasks completes, abort the other
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    let outcome = state
        .disconnect_participant_usecase
        .execute(&participant_id)
        .await;
    if outcome.removed {
        tracing::info!("Participant '{}' disconnected", participant_id);
    }
}

fn error_frame(code: ErrorCode, e: impl std::fmt::Display) -> ServerFrame {
    ServerFrame::Error {
        code,
        message: e.to_string(),
        request_id: None,
    }
}

fn invalid(e: impl std::fmt::Display) -> ServerFrame {
    error_frame(ErrorCode::InvalidFrame, e)
}

fn room_command_error(e: RoomCommandError) -> ServerFrame {
    let code = match e {
        RoomCommandError::RoomNotFound(_) => ErrorCode::RoomNotFound,
        RoomCommandError::NotHost(_)
        | RoomCommandError::AlreadyHosted(_)
        | RoomCommandError::NotLive => ErrorCode::NotHost,
    };
    error_frame(code, e)
}

fn playback_error(e: PlaybackError) -> ServerFrame {
    let code = match e {
        PlaybackError::RoomNotFound(_) => ErrorCode::RoomNotFound,
        PlaybackError::StateWriteRejected(_) => ErrorCode::StateWriteRejected,
        PlaybackError::NotConnected(_) => ErrorCode::InvalidFrame,
    };
    error_frame(code, e)
}

fn relay_error(e: RelayError) -> ServerFrame {
    let code = match e {
        RelayError::NotSubscribed(_) => ErrorCode::NotSubscribed,
        RelayError::NotConnected(_) | RelayError::DeliveryFailed(_) => ErrorCode::InvalidFrame,
    };
    error_frame(code, e)
}

/// Apply one client frame, returning the reply for the sender if any.
async fn dispatch(
    state: &AppState,
    participant_id: &ParticipantId,
    frame: ClientFrame,
) -> Option<ServerFrame> {
    tracing::debug!("Frame from '{}': {:?}", participant_id, frame);
    match frame {
        ClientFrame::StartRoom { room_id } => {
            let room_id = match RoomId::try_from(room_id) {
                Ok(id) => id,
                Err(e) => return Some(invalid(e)),
            };
            Some(
                match state
                    .room_lifecycle_usecase
                    .start(participant_id, room_id)
                    .await
                {
                    Ok(room) => ServerFrame::RoomStarted {
                        room_id: room.id.to_string(),
                        host_id: room.host_id.to_string(),
                    },
                    Err(e) => room_command_error(e),
                },
            )
        }
        ClientFrame::EndRoom { room_id } => {
            let room_id = match RoomId::try_from(room_id) {
                Ok(id) => id,
                Err(e) => return Some(invalid(e)),
            };
            Some(
                match state
                    .room_lifecycle_usecase
                    .end(participant_id, &room_id)
                    .await
                {
                    Ok(room) => ServerFrame::RoomEnded {
                        room_id: room.id.to_string(),
                        host_id: room.host_id.to_string(),
                    },
                    Err(e) => room_command_error(e),
                },
            )
        }
        ClientFrame::DescribeRoom { room_id } => {
            let room_id = match RoomId::try_from(room_id) {
                Ok(id) => id,
                Err(e) => return Some(invalid(e)),
            };
            Some(match state.room_lifecycle_usecase.describe(&room_id).await {
                Ok(room) => ServerFrame::RoomInfo {
                    room_id: room.id.to_string(),
                    host_id: room.host_id.to_string(),
                    status: room.status,
                },
                Err(e) => room_command_error(e),
            })
        }
        ClientFrame::Subscribe { channel } => {
            let channel = match ChannelName::try_from(channel) {
                Ok(c) => c,
                Err(e) => return Some(invalid(e)),
            };
            let name = channel.as_str().to_string();
            Some(
                match state
                    .channel_subscription_usecase
                    .subscribe(participant_id, channel)
                    .await
                {
                    Ok(_) => ServerFrame::Subscribed { channel: name },
                    Err(e) => relay_error(e),
                },
            )
        }
        ClientFrame::Unsubscribe { channel } => {
            let channel = match ChannelName::try_from(channel) {
                Ok(c) => c,
                Err(e) => return Some(invalid(e)),
            };
            Some(
                match state
                    .channel_subscription_usecase
                    .unsubscribe(participant_id, &channel)
                    .await
                {
                    Ok(_) => ServerFrame::Unsubscribed {
                        channel: channel.as_str().to_string(),
                    },
                    Err(e) => relay_error(e),
                },
            )
        }
        ClientFrame::Broadcast {
            channel,
            event,
            payload,
        } => {
            let channel = match ChannelName::try_from(channel) {
                Ok(c) => c,
                Err(e) => return Some(invalid(e)),
            };
            state
                .relay_broadcast_usecase
                .execute(participant_id, &channel, event, payload)
                .await
                .err()
                .map(relay_error)
        }
        ClientFrame::UpsertPlayback { room_id, state: playback } => {
            let room_id = match RoomId::try_from(room_id) {
                Ok(id) => id,
                Err(e) => return Some(invalid(e)),
            };
            let name = room_id.to_string();
            Some(
                match state
                    .playback_usecase
                    .upsert(participant_id, &room_id, playback)
                    .await
                {
                    Ok(_) => ServerFrame::PlaybackStored { room_id: name },
                    Err(e) => playback_error(e),
                },
            )
        }
        ClientFrame::WatchPlayback { room_id } => {
            let room_id = match RoomId::try_from(room_id) {
                Ok(id) => id,
                Err(e) => return Some(invalid(e)),
            };
            // The current record is pushed by the use case itself
            state
                .playback_usecase
                .watch(participant_id, &room_id)
                .await
                .err()
                .map(playback_error)
        }
        ClientFrame::Heartbeat => Some(ServerFrame::HeartbeatAck),
    }
}
