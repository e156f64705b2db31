//! Local and remote media handles.
//!
//! Tracks are modeled as handles only: an id, a kind and the shared
//! `enabled` flag toggled by the user. Encoding and rendering are out of
//! scope.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// A captured local track.
///
/// Clones share the `enabled` and `stopped` flags, so a toggle through any
/// handle is seen by every connection sending the track.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    enabled: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: Arc::new(AtomicBool::new(true)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Flip the enabled flag and return the new value
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Local capture bundle
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.track(MediaKind::Audio)
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.track(MediaKind::Video)
    }

    pub fn track(&self, kind: MediaKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|track| track.kind == kind)
    }

    /// Release every track
    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Track description received from a remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
}

/// Stream received from a remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStream {
    pub id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl From<&MediaStream> for RemoteStream {
    fn from(stream: &MediaStream) -> Self {
        Self {
            id: stream.id.clone(),
            tracks: stream
                .tracks
                .iter()
                .map(|track| RemoteTrack {
                    id: track.id.clone(),
                    kind: track.kind,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    AccessDenied(String),
    #[error("no capture device: {0}")]
    Unavailable(String),
}

/// Source of local capture streams
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints)
    -> Result<MediaStream, MediaError>;
}

/// Devices that hand out synthetic tracks, for headless sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticMediaDevices;

#[async_trait]
impl MediaDevices for SyntheticMediaDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaStream, MediaError> {
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(LocalTrack::new(
                uuid::Uuid::new_v4().to_string(),
                MediaKind::Audio,
            ));
        }
        if constraints.video {
            tracks.push(LocalTrack::new(
                uuid::Uuid::new_v4().to_string(),
                MediaKind::Video,
            ));
        }
        if tracks.is_empty() {
            return Err(MediaError::Unavailable(
                "neither audio nor video requested".to_string(),
            ));
        }
        Ok(MediaStream::new(uuid::Uuid::new_v4().to_string(), tracks))
    }
}
