//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use listenhall_shared::protocol::PlaybackState;

use crate::{
    domain::RoomId,
    infrastructure::dto::http::{RoomDetailDto, RoomSummaryDto},
    ui::state::AppState,
};

fn parse_room_id(raw: String) -> Result<RoomId, StatusCode> {
    RoomId::try_from(raw).map_err(|_| StatusCode::NOT_FOUND)
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Get list of rooms
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomSummaryDto>> {
    let rooms = state.room_lifecycle_usecase.list().await;
    Json(rooms.iter().map(RoomSummaryDto::from).collect())
}

/// Get room detail by ID
pub async fn get_room_detail(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomDetailDto>, StatusCode> {
    let room_id = parse_room_id(room_id)?;
    state
        .room_lifecycle_usecase
        .describe(&room_id)
        .await
        .map(|room| Json(RoomDetailDto::from(&room)))
        .map_err(|_| StatusCode::NOT_FOUND)
}

/// Get the playback record of a room
pub async fn get_room_playback(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<PlaybackState>, StatusCode> {
    let room_id = parse_room_id(room_id)?;
    state
        .playback_usecase
        .current(&room_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
