//! UseCase: チャンネルの購読・購読解除（どちらも冪等）

use std::sync::Arc;

use crate::domain::{ChannelName, ConnectionRegistry, ParticipantId, RepositoryError};

use super::error::RelayError;

impl From<RepositoryError> for RelayError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::ParticipantNotFound(id) | RepositoryError::DuplicateParticipant(id) => {
                RelayError::NotConnected(id)
            }
        }
    }
}

pub struct ChannelSubscriptionUseCase {
    registry: Arc<dyn ConnectionRegistry>,
}

impl ChannelSubscriptionUseCase {
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Returns `true` if the subscription is new
    pub async fn subscribe(
        &self,
        participant_id: &ParticipantId,
        channel: ChannelName,
    ) -> Result<bool, RelayError> {
        let name = channel.as_str().to_string();
        let added = self.registry.subscribe(participant_id, channel).await?;
        if added {
            tracing::debug!("'{}' subscribed to '{}'", participant_id, name);
        }
        Ok(added)
    }

    /// Returns `true` if a subscription was removed
    pub async fn unsubscribe(
        &self,
        participant_id: &ParticipantId,
        channel: &ChannelName,
    ) -> Result<bool, RelayError> {
        let removed = self.registry.unsubscribe(participant_id, channel).await?;
        if removed {
            tracing::debug!("'{}' unsubscribed from '{}'", participant_id, channel.as_str());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecase::test_support::{Fixture, channel, participant};

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe_are_idempotent() {
        // テスト項目: 購読・購読解除を繰り返してもエラーにならない
        // given (前提条件):
        let fixture = Fixture::new();
        let _rx = fixture.connect("alice").await;
        let usecase = ChannelSubscriptionUseCase::new(fixture.registry.clone());

        // when (操作):
        let first = usecase
            .subscribe(&participant("alice"), channel("room:a"))
            .await;
        let again = usecase
            .subscribe(&participant("alice"), channel("room:a"))
            .await;
        let removed = usecase
            .unsubscribe(&participant("alice"), &channel("room:a"))
            .await;
        let removed_again = usecase
            .unsubscribe(&participant("alice"), &channel("room:a"))
            .await;

        // then (期待する結果):
        assert_eq!(first, Ok(true));
        assert_eq!(again, Ok(false));
        assert_eq!(removed, Ok(true));
        assert_eq!(removed_again, Ok(false));
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        // テスト項目: 未接続の参加者は購読できない
        let fixture = Fixture::new();
        let usecase = ChannelSubscriptionUseCase::new(fixture.registry.clone());
        let result = usecase
            .subscribe(&participant("ghost"), channel("room:a"))
            .await;
        assert_eq!(result, Err(RelayError::NotConnected("ghost".to_string())));
    }
}
