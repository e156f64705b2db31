//! Entities of the relay domain.

use std::collections::BTreeSet;

use listenhall_shared::protocol::{PlaybackState, RoomStatus};
use thiserror::Error;

use super::value_object::{ChannelName, ParticipantId, RoomId, Timestamp};

/// Errors raised by [`Room`] invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomRuleError {
    #[error("participant '{0}' is not the host of this room")]
    NotHost(String),
    #[error("room is not live")]
    NotLive,
    #[error("room is already hosted by '{0}'")]
    AlreadyHosted(String),
}

/// A listening room.
///
/// Exactly one host per room. The playback record is single-writer: only the
/// host may replace it, and it is reset to the empty state whenever a new
/// session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Room {
    pub id: RoomId,
    pub host_id: ParticipantId,
    pub status: RoomStatus,
    pub playback: PlaybackState,
    pub created_at: Timestamp,
    pub ended_at: Option<Timestamp>,
}

impl Room {
    /// A room that has been created but not started yet.
    pub fn scheduled(id: RoomId, host_id: ParticipantId, created_at: Timestamp) -> Self {
        Self {
            id,
            host_id,
            status: RoomStatus::Scheduled,
            playback: PlaybackState::empty(),
            created_at,
            ended_at: None,
        }
    }

    pub fn is_host(&self, participant_id: &ParticipantId) -> bool {
        &self.host_id == participant_id
    }

    pub fn is_live(&self) -> bool {
        self.status == RoomStatus::Live
    }

    /// Start a session hosted by `host_id`.
    ///
    /// An ended room may be restarted by anyone, who becomes its host.
    pub fn start(&mut self, host_id: &ParticipantId) -> Result<(), RoomRuleError> {
        match self.status {
            RoomStatus::Live if !self.is_host(host_id) => {
                Err(RoomRuleError::AlreadyHosted(self.host_id.to_string()))
            }
            RoomStatus::Live => Ok(()),
            RoomStatus::Scheduled if !self.is_host(host_id) => {
                Err(RoomRuleError::NotHost(host_id.to_string()))
            }
            RoomStatus::Scheduled | RoomStatus::Ended => {
                self.host_id = host_id.clone();
                self.status = RoomStatus::Live;
                self.playback = PlaybackState::empty();
                self.ended_at = None;
                Ok(())
            }
        }
    }

    /// End the session. Only the host may end it; ending twice is a no-op.
    pub fn end(&mut self, by: &ParticipantId, at: Timestamp) -> Result<(), RoomRuleError> {
        if !self.is_host(by) {
            return Err(RoomRuleError::NotHost(by.to_string()));
        }
        if self.status != RoomStatus::Ended {
            self.status = RoomStatus::Ended;
            self.ended_at = Some(at);
        }
        Ok(())
    }

    /// Replace the playback record on behalf of `writer`.
    pub fn write_playback(
        &mut self,
        writer: &ParticipantId,
        state: PlaybackState,
    ) -> Result<(), RoomRuleError> {
        if !self.is_host(writer) {
            return Err(RoomRuleError::NotHost(writer.to_string()));
        }
        if !self.is_live() {
            return Err(RoomRuleError::NotLive);
        }
        self.playback = state;
        Ok(())
    }
}

/// A live relay connection of one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub participant_id: ParticipantId,
    pub connected_at: Timestamp,
    /// Time of the last frame received from the participant
    pub last_seen: Timestamp,
    pub channels: BTreeSet<ChannelName>,
    /// Rooms whose playback record the participant follows
    pub watching: BTreeSet<RoomId>,
}

impl Connection {
    pub fn new(participant_id: ParticipantId, connected_at: Timestamp) -> Self {
        Self {
            participant_id,
            connected_at,
            last_seen: connected_at,
            channels: BTreeSet::new(),
            watching: BTreeSet::new(),
        }
    }
}
