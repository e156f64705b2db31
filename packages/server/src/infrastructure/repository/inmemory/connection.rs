//! In-memory connection registry.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    ChannelName, Connection, ConnectionRegistry, ParticipantId, RepositoryError, RoomId,
    Timestamp,
};

/// In-memory [`ConnectionRegistry`]
///
/// Channel membership is stored on each [`Connection`], so removing a
/// connection drops all of its subscriptions at once.
#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    connections: Mutex<HashMap<ParticipantId, Connection>>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(participant_id: &ParticipantId) -> RepositoryError {
    RepositoryError::ParticipantNotFound(participant_id.to_string())
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn add(&self, connection: Connection) -> Result<(), RepositoryError> {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&connection.participant_id) {
            return Err(RepositoryError::DuplicateParticipant(
                connection.participant_id.to_string(),
            ));
        }
        connections.insert(connection.participant_id.clone(), connection);
        Ok(())
    }

    async fn remove(&self, participant_id: &ParticipantId) -> Option<Connection> {
        let mut connections = self.connections.lock().await;
        connections.remove(participant_id)
    }

    async fn contains(&self, participant_id: &ParticipantId) -> bool {
        let connections = self.connections.lock().await;
        connections.contains_key(participant_id)
    }

    async fn touch(
        &self,
        participant_id: &ParticipantId,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(participant_id)
            .ok_or_else(|| not_found(participant_id))?;
        if at > connection.last_seen {
            connection.last_seen = at;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        participant_id: &ParticipantId,
        channel: ChannelName,
    ) -> Result<bool, RepositoryError> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(participant_id)
            .ok_or_else(|| not_found(participant_id))?;
        Ok(connection.channels.insert(channel))
    }

    async fn unsubscribe(
        &self,
        participant_id: &ParticipantId,
        channel: &ChannelName,
    ) -> Result<bool, RepositoryError> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(participant_id)
            .ok_or_else(|| not_found(participant_id))?;
        Ok(connection.channels.remove(channel))
    }

    async fn is_subscribed(&self, participant_id: &ParticipantId, channel: &ChannelName) -> bool {
        let connections = self.connections.lock().await;
        connections
            .get(participant_id)
            .is_some_and(|c| c.channels.contains(channel))
    }

    async fn subscribers(&self, channel: &ChannelName) -> Vec<ParticipantId> {
        let connections = self.connections.lock().await;
        let mut ids: Vec<ParticipantId> = connections
            .values()
            .filter(|c| c.channels.contains(channel))
            .map(|c| c.participant_id.clone())
            .collect();
        ids.sort();
        ids
    }

    async fn watch(
        &self,
        participant_id: &ParticipantId,
        room_id: RoomId,
    ) -> Result<(), RepositoryError> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(participant_id)
            .ok_or_else(|| not_found(participant_id))?;
        connection.watching.insert(room_id);
        Ok(())
    }

    async fn watchers(&self, room_id: &RoomId) -> Vec<ParticipantId> {
        let connections = self.connections.lock().await;
        let mut ids: Vec<ParticipantId> = connections
            .values()
            .filter(|c| c.watching.contains(room_id))
            .map(|c| c.participant_id.clone())
            .collect();
        ids.sort();
        ids
    }

    async fn idle_since(&self, cutoff: Timestamp) -> Vec<ParticipantId> {
        let connections = self.connections.lock().await;
        connections
            .values()
            .filter(|c| c.last_seen < cutoff)
            .map(|c| c.participant_id.clone())
            .collect()
    }

    async fn count(&self) -> usize {
        let connections = self.connections.lock().await;
        connections.len()
    }
}
