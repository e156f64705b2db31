//! Error types surfaced by the listening session.

use thiserror::Error;

use listenhall_shared::protocol::ErrorCode;

use crate::{media::MediaError, transport::TransportError};

/// Failures visible to the application layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// The signaling channel could not be subscribed within the join timeout
    #[error("signaling channel '{channel}' unavailable: {reason}")]
    ChannelUnavailable { channel: String, reason: String },

    /// Local camera or microphone could not be acquired
    #[error("media access denied: {0}")]
    MediaAccessDenied(String),

    /// A peer link exhausted its retries
    #[error("negotiation with '{peer}' failed: {reason}")]
    PeerNegotiationFailed { peer: String, reason: String },

    /// A non-host attempted to write the playback record
    #[error("playback write rejected: {0}")]
    StateWriteRejected(String),

    /// The room does not exist or has no live host
    #[error("room '{0}' is not available")]
    RoomUnavailable(String),

    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Rejected {
                code: ErrorCode::StateWriteRejected,
                message,
            } => SessionError::StateWriteRejected(message),
            TransportError::Rejected {
                code: ErrorCode::RoomNotFound,
                message,
            } => SessionError::RoomUnavailable(message),
            other => SessionError::Transport(other),
        }
    }
}

impl From<MediaError> for SessionError {
    fn from(e: MediaError) -> Self {
        SessionError::MediaAccessDenied(e.to_string())
    }
}
