//! Outbound delivery interface.

use async_trait::async_trait;
use listenhall_shared::protocol::ServerFrame;
use tokio::sync::mpsc;

use super::{MessagePushError, ParticipantId};

/// Channel carrying encoded frames to one connection's socket writer
pub type PusherChannel = mpsc::UnboundedSender<String>;

/// Delivers frames to connected participants.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePusher: Send + Sync {
    async fn register_client(&self, participant_id: ParticipantId, sender: PusherChannel);

    async fn unregister_client(&self, participant_id: &ParticipantId);

    async fn push_to(
        &self,
        participant_id: &ParticipantId,
        frame: &ServerFrame,
    ) -> Result<(), MessagePushError>;

    /// Best-effort fan out: a missing or closed target is skipped, not an error
    async fn broadcast(
        &self,
        targets: Vec<ParticipantId>,
        frame: &ServerFrame,
    ) -> Result<(), MessagePushError>;
}
