//! HTTP API response DTOs and their conversion from domain entities.

use listenhall_shared::{
    protocol::{PlaybackState, RoomStatus},
    time::timestamp_to_rfc3339,
};
use serde::{Deserialize, Serialize};

use crate::domain::Room;

/// Item of `GET /api/rooms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummaryDto {
    pub id: String,
    pub host_id: String,
    pub status: RoomStatus,
    pub created_at: String,
}

/// Body of `GET /api/rooms/{room_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDetailDto {
    pub id: String,
    pub host_id: String,
    pub status: RoomStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub playback: PlaybackState,
}

impl From<&Room> for RoomSummaryDto {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id.as_str().to_string(),
            host_id: room.host_id.as_str().to_string(),
            status: room.status,
            created_at: timestamp_to_rfc3339(room.created_at.value()),
        }
    }
}

impl From<&Room> for RoomDetailDto {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id.as_str().to_string(),
            host_id: room.host_id.as_str().to_string(),
            status: room.status,
            created_at: timestamp_to_rfc3339(room.created_at.value()),
            ended_at: room.ended_at.map(|at| timestamp_to_rfc3339(at.value())),
            playback: room.playback.clone(),
        }
    }
}
