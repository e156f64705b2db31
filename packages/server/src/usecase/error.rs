//! UseCase 層のエラー定義

use thiserror::Error;

/// 接続時のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("participant '{0}' is already connected")]
    DuplicateParticipant(String),
}

/// ルームのライフサイクル操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomCommandError {
    #[error("room '{0}' not found")]
    RoomNotFound(String),
    #[error("participant '{0}' is not the host of this room")]
    NotHost(String),
    #[error("room is already hosted by '{0}'")]
    AlreadyHosted(String),
    #[error("room is not live")]
    NotLive,
}

/// 再生状態の読み書きのエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("room '{0}' not found")]
    RoomNotFound(String),
    #[error("playback write rejected: {0}")]
    StateWriteRejected(String),
    #[error("participant '{0}' is not connected")]
    NotConnected(String),
}

/// チャンネル購読・中継のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("participant '{0}' is not connected")]
    NotConnected(String),
    #[error("not subscribed to channel '{0}'")]
    NotSubscribed(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}
