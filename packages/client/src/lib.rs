//! listenhall client library.
//!
//! The real-time core of a listening party: a signaling transport layered on
//! a pub/sub channel, a peer connection manager for the one-host-to-many-viewers
//! mesh, and playback synchronization against a host-written record.

pub mod config;
pub mod error;
pub mod formatter;
pub mod media;
pub mod peer;
pub mod role;
pub mod runner;
pub mod session;
pub mod signaling;
pub mod sync;
pub mod transport;
