//! Errors surfaced by domain interfaces.

use thiserror::Error;

/// Data access errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("participant '{0}' is already connected")]
    DuplicateParticipant(String),
    #[error("participant '{0}' is not connected")]
    ParticipantNotFound(String),
}

/// Delivery errors of a [`super::MessagePusher`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagePushError {
    #[error("participant '{0}' has no registered channel")]
    ClientNotFound(String),
    #[error("push failed: {0}")]
    PushFailed(String),
    #[error("frame could not be encoded: {0}")]
    Encode(String),
}
