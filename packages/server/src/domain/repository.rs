//! Repository trait definitions
//!
//! The use cases depend on these interfaces only; the infrastructure layer
//! provides the implementations.

use async_trait::async_trait;

use super::{
    ChannelName, Connection, ParticipantId, RepositoryError, Room, RoomId, Timestamp,
};

/// Row-per-room store holding room lifecycle and the playback record.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// Insert or replace the room keyed by its id
    async fn save(&self, room: Room);

    async fn find(&self, room_id: &RoomId) -> Option<Room>;

    async fn list(&self) -> Vec<Room>;

    /// Live rooms hosted by the participant
    async fn live_rooms_hosted_by(&self, participant_id: &ParticipantId) -> Vec<Room>;
}

/// Registry of live connections and their channel memberships.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn add(&self, connection: Connection) -> Result<(), RepositoryError>;

    /// Remove the connection, returning it if it existed
    async fn remove(&self, participant_id: &ParticipantId) -> Option<Connection>;

    async fn contains(&self, participant_id: &ParticipantId) -> bool;

    /// Record activity of the participant
    async fn touch(
        &self,
        participant_id: &ParticipantId,
        at: Timestamp,
    ) -> Result<(), RepositoryError>;

    /// Returns `true` if the subscription is new
    async fn subscribe(
        &self,
        participant_id: &ParticipantId,
        channel: ChannelName,
    ) -> Result<bool, RepositoryError>;

    /// Returns `true` if a subscription was removed
    async fn unsubscribe(
        &self,
        participant_id: &ParticipantId,
        channel: &ChannelName,
    ) -> Result<bool, RepositoryError>;

    async fn is_subscribed(&self, participant_id: &ParticipantId, channel: &ChannelName) -> bool;

    async fn subscribers(&self, channel: &ChannelName) -> Vec<ParticipantId>;

    async fn watch(
        &self,
        participant_id: &ParticipantId,
        room_id: RoomId,
    ) -> Result<(), RepositoryError>;

    async fn watchers(&self, room_id: &RoomId) -> Vec<ParticipantId>;

    /// Participants whose last activity is strictly before `cutoff`
    async fn idle_since(&self, cutoff: Timestamp) -> Vec<ParticipantId>;

    async fn count(&self) -> usize;
}
