//! Collaborator interfaces consumed by the core, and their implementations.
//!
//! - [`ChannelTransport`]: named pub/sub channels (signaling rendezvous)
//! - [`RoomDirectory`]: room lifecycle and host lookup
//! - [`crate::sync::PlaybackStore`]: row-per-room playback record
//!
//! [`memory`] implements all three in-process; [`relay`] talks to the relay
//! server over WebSocket.

pub mod memory;
pub mod relay;

use async_trait::async_trait;
use listenhall_shared::protocol::{ErrorCode, RoomStatus};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{InMemoryHub, InMemoryTransport};
pub use relay::RelayConnection;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("participant '{0}' is already connected")]
    DuplicateParticipant(String),
    #[error("connection closed")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("rejected by relay ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },
    #[error("frame could not be encoded: {0}")]
    Encode(String),
}

/// One event received on a channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub event: String,
    /// Participant that published the event, as stamped by the transport
    pub from: String,
    pub payload: Value,
}

/// An established channel subscription.
///
/// The receiver yields `None` once the subscription is torn down or the
/// underlying connection is lost.
#[derive(Debug)]
pub struct ChannelSubscription {
    pub channel: String,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Named publish/subscribe channels.
///
/// A publisher never receives its own events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Identity the transport publishes under
    fn participant_id(&self) -> &str;

    /// Subscribe to `channel`. Resolves once the subscription is acknowledged.
    async fn subscribe(&self, channel: &str) -> Result<ChannelSubscription, TransportError>;

    /// Publish without waiting for delivery
    async fn send(&self, channel: &str, event: &str, payload: Value) -> Result<(), TransportError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;
}

/// Public description of a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: String,
    pub host_id: String,
    pub status: RoomStatus,
}

/// Room lifecycle operations
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Start (or restart) the room with the caller as host
    async fn start_room(&self, room_id: &str) -> Result<RoomInfo, TransportError>;

    async fn end_room(&self, room_id: &str) -> Result<(), TransportError>;

    async fn describe_room(&self, room_id: &str) -> Result<RoomInfo, TransportError>;
}
