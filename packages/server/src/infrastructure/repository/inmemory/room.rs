//! In-memory room repository.
//!
//! Rooms are kept for the lifetime of the process; ended rooms stay
//! queryable as an archive.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ParticipantId, Room, RoomId, RoomRepository};

/// In-memory [`RoomRepository`]
#[derive(Default)]
pub struct InMemoryRoomRepository {
    rooms: Mutex<HashMap<RoomId, Room>>,
}

impl InMemoryRoomRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    async fn save(&self, room: Room) {
        let mut rooms = self.rooms.lock().await;
        rooms.insert(room.id.clone(), room);
    }

    async fn find(&self, room_id: &RoomId) -> Option<Room> {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).cloned()
    }

    async fn list(&self) -> Vec<Room> {
        let rooms = self.rooms.lock().await;
        let mut result: Vec<Room> = rooms.values().cloned().collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    async fn live_rooms_hosted_by(&self, participant_id: &ParticipantId) -> Vec<Room> {
        let rooms = self.rooms.lock().await;
        rooms
            .values()
            .filter(|room| room.is_live() && room.is_host(participant_id))
            .cloned()
            .collect()
    }
}
