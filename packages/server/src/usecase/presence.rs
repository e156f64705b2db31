//! UseCase: ハートビートと無応答の参加者の掃除

use std::{sync::Arc, time::Duration};

use listenhall_shared::time::Clock;

use crate::domain::{ConnectionRegistry, ParticipantId, Timestamp};

use super::disconnect_participant::DisconnectParticipantUseCase;

/// Default time without any frame after which a participant is marked left
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PresenceUseCase {
    registry: Arc<dyn ConnectionRegistry>,
    disconnect: Arc<DisconnectParticipantUseCase>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl PresenceUseCase {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        disconnect: Arc<DisconnectParticipantUseCase>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            disconnect,
            clock,
            timeout,
        }
    }

    /// Record that a frame was received from the participant
    pub async fn touch(&self, participant_id: &ParticipantId) {
        let now = Timestamp::new(self.clock.now_millis());
        if let Err(e) = self.registry.touch(participant_id, now).await {
            tracing::debug!("Ignoring heartbeat: {}", e);
        }
    }

    /// Disconnect every participant silent for longer than the timeout
    pub async fn sweep(&self) -> Vec<ParticipantId> {
        let cutoff = self.clock.now_millis() - self.timeout.as_millis() as i64;
        let idle = self.registry.idle_since(Timestamp::new(cutoff)).await;
        for participant_id in &idle {
            tracing::info!("Participant '{}' timed out", participant_id);
            self.disconnect.execute(participant_id).await;
        }
        idle
    }
}
