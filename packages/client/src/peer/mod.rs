//! Peer Connection Manager.
//!
//! Host/viewer star topology: the host serves one link per viewer, a viewer
//! holds a single link to the host. The actual negotiation (offer/answer/ICE,
//! media transport) belongs to a [`PeerConnector`]; this module drives it
//! through signaling and owns the per-link lifecycle.

mod descriptor;
mod link;
mod manager;

use async_trait::async_trait;
use listenhall_shared::protocol::SignalKind;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::{LocalTrack, MediaStream, RemoteStream};

pub use descriptor::DescriptorConnector;
pub use link::{LinkState, PeerLink, Recovery, RetryPolicy};
pub use manager::{NEGOTIATION_TIMEOUT, PeerManager, PeerManagerConfig, PeerObserver};

/// Output of a peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A negotiation blob to relay to the remote side
    Signal { kind: SignalKind, payload: Value },
    /// Negotiation completed
    Connected,
    /// The remote side published a stream
    Stream(RemoteStream),
    /// The connection went away
    Closed,
    /// Negotiation or transport failure
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("peer connection could not be created: {0}")]
    Create(String),
    #[error("signal rejected: {0}")]
    Signal(String),
    #[error("peer connection is closed")]
    Closed,
}

/// One negotiated connection to a remote participant
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Feed a blob received from the remote side
    async fn signal(&self, kind: SignalKind, payload: Value) -> Result<(), PeerError>;

    /// Swap the outgoing track of the same kind without renegotiating
    async fn replace_track(&self, track: LocalTrack) -> Result<(), PeerError>;

    async fn close(&self);
}

/// A created connection together with its event stream
pub struct PeerHandle {
    pub connection: Box<dyn PeerConnection>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Parameters of a new connection
#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub remote_id: String,
    /// The initiating side emits the first offer
    pub initiator: bool,
    /// Local stream to send, if any
    pub stream: Option<MediaStream>,
}

/// Factory of peer connections
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(&self, options: PeerOptions) -> Result<PeerHandle, PeerError>;
}
