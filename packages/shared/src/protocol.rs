//! Wire protocol shared by the relay server and its clients.
//!
//! Every WebSocket text frame is one JSON object tagged by `type`.
//! Payloads published on a channel are relayed verbatim; the relay never
//! inspects them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name used for signaling envelopes on a room channel.
pub const SIGNAL_EVENT: &str = "signal";

/// Name of the signaling channel of a room.
pub fn signal_channel(room_id: &str) -> String {
    format!("room:{room_id}")
}

// ========================================
// Signaling envelope
// ========================================

/// Kind of a connection-negotiation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    /// The sender tore down its side of the connection
    Bye,
}

/// Envelope exchanged between room participants: `{type, from, to?, signal}`.
///
/// `to == None` addresses every participant but the sender.
/// `signal` is produced and consumed by the peer-connection primitive only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub r#type: SignalKind,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub signal: Value,
}

impl SignalMessage {
    /// Create a message addressed to one participant.
    pub fn unicast(kind: SignalKind, from: &str, to: &str, signal: Value) -> Self {
        Self {
            r#type: kind,
            from: from.to_string(),
            to: Some(to.to_string()),
            signal,
        }
    }

    /// Create a message addressed to every other participant.
    pub fn broadcast(kind: SignalKind, from: &str, signal: Value) -> Self {
        Self {
            r#type: kind,
            from: from.to_string(),
            to: None,
            signal,
        }
    }
}

// ========================================
// Playback record
// ========================================

/// Shared "now playing" record of a room. Written by the host only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Active track, `None` when nothing is selected
    pub track_id: Option<String>,
    /// Playhead position in the track at `last_update` (milliseconds)
    pub position_ms: i64,
    /// Whether the playhead advances with wall-clock time
    pub playing: bool,
    /// Wall-clock time of the write (Unix milliseconds)
    pub last_update: i64,
}

impl PlaybackState {
    /// State of a freshly started room: no track, position 0, paused.
    pub fn empty() -> Self {
        Self {
            track_id: None,
            position_ms: 0,
            playing: false,
            last_update: 0,
        }
    }

    pub fn new(track_id: Option<String>, position_ms: i64, playing: bool, now_ms: i64) -> Self {
        Self {
            track_id,
            position_ms,
            playing,
            last_update: now_ms,
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::empty()
    }
}

// ========================================
// Relay frames
// ========================================

/// Lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomStatus {
    Scheduled,
    Live,
    Ended,
}

/// Machine-readable error codes carried by [`ServerFrame::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    RoomNotFound,
    StateWriteRejected,
    NotHost,
    InvalidFrame,
    NotSubscribed,
}

/// Frames sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    StartRoom {
        room_id: String,
    },
    EndRoom {
        room_id: String,
    },
    Subscribe {
        channel: String,
    },
    Unsubscribe {
        channel: String,
    },
    Broadcast {
        channel: String,
        event: String,
        payload: Value,
    },
    UpsertPlayback {
        room_id: String,
        state: PlaybackState,
    },
    WatchPlayback {
        room_id: String,
    },
    DescribeRoom {
        room_id: String,
    },
    Heartbeat,
}

/// A [`ClientFrame`] with the id the relay echoes on a rejection.
///
/// `{"request_id": 7, "type": "subscribe", "channel": "room:a"}`. Frames
/// without an id are accepted; their rejections cannot be correlated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub frame: ClientFrame,
}

impl ClientRequest {
    pub fn new(request_id: u64, frame: ClientFrame) -> Self {
        Self {
            request_id: Some(request_id),
            frame,
        }
    }
}

/// Frames sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    Connected {
        participant_id: String,
    },
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    Broadcast {
        channel: String,
        event: String,
        from: String,
        payload: Value,
    },
    RoomStarted {
        room_id: String,
        host_id: String,
    },
    RoomEnded {
        room_id: String,
        host_id: String,
    },
    /// Acknowledges an accepted playback write
    PlaybackStored {
        room_id: String,
    },
    PlaybackChanged {
        room_id: String,
        state: PlaybackState,
    },
    RoomInfo {
        room_id: String,
        host_id: String,
        status: RoomStatus,
    },
    HeartbeatAck,
    Error {
        code: ErrorCode,
        message: String,
        /// Id of the rejected request, when it carried one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
    },
}

impl ServerFrame {
    /// Stamp a rejection with the id of the request it answers.
    pub fn answering(self, id: Option<u64>) -> Self {
        match self {
            ServerFrame::Error { code, message, .. } => ServerFrame::Error {
                code,
                message,
                request_id: id,
            },
            other => other,
        }
    }
}
