//! listenhall relay server library.
//!
//! Provides the hosted side of a listening party: named pub/sub channels used
//! as the signaling rendezvous, and one playback record per room that only the
//! room's host may write.

pub mod config;

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;
