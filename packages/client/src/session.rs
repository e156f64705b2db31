//! A participant's listening session.
//!
//! Composes signaling, the peer manager and playback sync for one room:
//! the host captures media, starts the room and writes the playback record;
//! a viewer connects to the host and follows the record.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use listenhall_shared::{
    protocol::{PlaybackState, RoomStatus},
    time::Clock,
};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};

use crate::{
    error::SessionError,
    media::{MediaConstraints, MediaDevices},
    peer::{PeerConnector, PeerManager, PeerManagerConfig, PeerObserver},
    role::Role,
    signaling::{JOIN_TIMEOUT, SignalingTransport},
    sync::{
        PlaybackHost, PlaybackStore, PlaybackView, SyncConfig, compute_local_position,
        run_viewer_loop,
    },
    transport::{ChannelTransport, InMemoryHub, RelayConnection, RoomDirectory},
};

/// Collaborators of a session
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn ChannelTransport>,
    pub store: Arc<dyn PlaybackStore>,
    pub directory: Arc<dyn RoomDirectory>,
    pub connector: Arc<dyn PeerConnector>,
    pub media: Arc<dyn MediaDevices>,
    pub clock: Arc<dyn Clock>,
}

impl SessionDeps {
    /// Everything backed by one relay connection
    pub fn relay(
        connection: RelayConnection,
        connector: Arc<dyn PeerConnector>,
        media: Arc<dyn MediaDevices>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let connection = Arc::new(connection);
        Self {
            transport: connection.clone(),
            store: connection.clone(),
            directory: connection,
            connector,
            media,
            clock,
        }
    }

    /// Everything backed by an in-process hub
    pub fn in_memory(
        hub: &InMemoryHub,
        participant_id: &str,
        connector: Arc<dyn PeerConnector>,
        media: Arc<dyn MediaDevices>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let transport = Arc::new(hub.transport(participant_id));
        Self {
            transport: transport.clone(),
            store: transport.clone(),
            directory: transport,
            connector,
            media,
            clock,
        }
    }
}

/// Per-session settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub room_id: String,
    pub participant_id: String,
    pub join_timeout: Duration,
    pub peer: PeerManagerConfig,
    pub sync: SyncConfig,
    pub constraints: MediaConstraints,
}

impl SessionOptions {
    pub fn new(room_id: impl Into<String>, participant_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            participant_id: participant_id.into(),
            join_timeout: JOIN_TIMEOUT,
            peer: PeerManagerConfig::default(),
            sync: SyncConfig::default(),
            constraints: MediaConstraints::default(),
        }
    }
}

pub struct ListeningSession {
    room_id: String,
    participant_id: String,
    host_id: String,
    role: Role,
    peers: PeerManager,
    writer: PlaybackHost,
    directory: Arc<dyn RoomDirectory>,
    clock: Arc<dyn Clock>,
    /// Last state written by this participant (host only)
    written: Mutex<Option<PlaybackState>>,
    view: watch::Receiver<PlaybackView>,
    sync_task: Option<JoinHandle<()>>,
    left: AtomicBool,
}

impl ListeningSession {
    /// Capture media, start the room and serve viewers.
    ///
    /// # Errors
    ///
    /// - [`SessionError::MediaAccessDenied`] when capture fails
    /// - [`SessionError::ChannelUnavailable`] when signaling cannot be joined
    /// - [`SessionError::Transport`] when the room cannot be started
    pub async fn start_as_host(
        options: SessionOptions,
        deps: SessionDeps,
        observer: Arc<dyn PeerObserver>,
    ) -> Result<Self, SessionError> {
        let stream = deps.media.get_user_media(options.constraints).await?;
        tracing::info!(
            "Captured local stream '{}' for room '{}'",
            stream.id,
            options.room_id
        );

        if let Err(e) = deps.directory.start_room(&options.room_id).await {
            stream.stop();
            return Err(e.into());
        }

        let signaling =
            SignalingTransport::with_join_timeout(deps.transport.clone(), options.join_timeout);
        let (handle, inbox) = match signaling
            .join(&options.room_id, &options.participant_id)
            .await
        {
            Ok(joined) => joined,
            Err(e) => {
                stream.stop();
                if let Err(end_error) = deps.directory.end_room(&options.room_id).await {
                    tracing::warn!("Failed to end room '{}': {}", options.room_id, end_error);
                }
                return Err(e);
            }
        };

        let peers = PeerManager::start(handle, inbox, deps.connector, observer, options.peer);
        peers.initialize_as_host(stream).await;

        let (_, view) = watch::channel(PlaybackView::default());
        tracing::info!(
            "Room '{}' is live, hosted by '{}'",
            options.room_id,
            options.participant_id
        );
        Ok(Self {
            writer: PlaybackHost::new(
                options.room_id.clone(),
                Role::Host,
                deps.store,
                deps.clock.clone(),
            ),
            host_id: options.participant_id.clone(),
            room_id: options.room_id,
            participant_id: options.participant_id,
            role: Role::Host,
            peers,
            directory: deps.directory,
            clock: deps.clock,
            written: Mutex::new(Some(PlaybackState::empty())),
            view,
            sync_task: None,
            left: AtomicBool::new(false),
        })
    }

    /// Join a live room, connect to its host and follow the playback record.
    ///
    /// # Errors
    ///
    /// - [`SessionError::RoomUnavailable`] when the room is unknown or not live
    /// - [`SessionError::ChannelUnavailable`] when signaling cannot be joined
    pub async fn join_as_viewer(
        options: SessionOptions,
        deps: SessionDeps,
        observer: Arc<dyn PeerObserver>,
    ) -> Result<Self, SessionError> {
        let room = deps.directory.describe_room(&options.room_id).await?;
        if room.status != RoomStatus::Live {
            return Err(SessionError::RoomUnavailable(options.room_id));
        }

        let signaling =
            SignalingTransport::with_join_timeout(deps.transport.clone(), options.join_timeout);
        let (handle, inbox) = signaling
            .join(&options.room_id, &options.participant_id)
            .await?;

        let peers = PeerManager::start(handle, inbox, deps.connector, observer, options.peer);
        if let Err(e) = peers.connect_to_host(&room.host_id).await {
            peers.disconnect().await;
            return Err(e);
        }

        let updates = match deps.store.watch(&options.room_id).await {
            Ok(updates) => updates,
            Err(e) => {
                peers.disconnect().await;
                return Err(e.into());
            }
        };
        let (view_tx, view) = watch::channel(PlaybackView::default());
        let sync_task = tokio::spawn(run_viewer_loop(
            updates,
            deps.clock.clone(),
            options.sync,
            view_tx,
        ));

        tracing::info!(
            "Joined room '{}' as '{}', host is '{}'",
            options.room_id,
            options.participant_id,
            room.host_id
        );
        Ok(Self {
            writer: PlaybackHost::new(
                options.room_id.clone(),
                Role::Viewer,
                deps.store,
                deps.clock.clone(),
            ),
            host_id: room.host_id,
            room_id: options.room_id,
            participant_id: options.participant_id,
            role: Role::Viewer,
            peers,
            directory: deps.directory,
            clock: deps.clock,
            written: Mutex::new(None),
            view,
            sync_task: Some(sync_task),
            left: AtomicBool::new(false),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }

    /// Write a new playback snapshot. Host only.
    pub async fn set_playback(
        &self,
        track_id: Option<String>,
        position_ms: i64,
        playing: bool,
    ) -> Result<PlaybackState, SessionError> {
        let state = self
            .writer
            .host_set_state(track_id, position_ms, playing)
            .await?;
        *self.written.lock().await = Some(state.clone());
        Ok(state)
    }

    /// Start `track_id` from the beginning
    pub async fn play(&self, track_id: &str) -> Result<PlaybackState, SessionError> {
        self.set_playback(Some(track_id.to_string()), 0, true).await
    }

    /// Freeze the current track at its current position
    pub async fn pause(&self) -> Result<PlaybackState, SessionError> {
        let (track_id, position_ms) = self.current_position().await;
        self.set_playback(track_id, position_ms, false).await
    }

    pub async fn resume(&self) -> Result<PlaybackState, SessionError> {
        let (track_id, position_ms) = self.current_position().await;
        self.set_playback(track_id, position_ms, true).await
    }

    /// Jump to `position_ms` keeping the play/pause state
    pub async fn seek(&self, position_ms: i64) -> Result<PlaybackState, SessionError> {
        let written = self.written.lock().await.clone().unwrap_or_default();
        self.set_playback(written.track_id, position_ms.max(0), written.playing)
            .await
    }

    async fn current_position(&self) -> (Option<String>, i64) {
        let written = self.written.lock().await.clone().unwrap_or_default();
        let position_ms = compute_local_position(&written, self.clock.now_millis());
        (written.track_id, position_ms)
    }

    /// What this participant currently shows
    pub async fn playback_view(&self) -> PlaybackView {
        if self.role.is_host() {
            let written = self.written.lock().await.clone().unwrap_or_default();
            PlaybackView {
                position_ms: compute_local_position(&written, self.clock.now_millis()),
                track_id: written.track_id,
                playing: written.playing,
            }
        } else {
            self.view.borrow().clone()
        }
    }

    /// Viewer display updates, published after every tick and host push
    pub fn view_updates(&self) -> watch::Receiver<PlaybackView> {
        self.view.clone()
    }

    pub async fn toggle_audio(&self) -> Option<bool> {
        self.peers.toggle_local_audio().await
    }

    pub async fn toggle_video(&self) -> Option<bool> {
        self.peers.toggle_local_video().await
    }

    /// Release tracks, links and the signaling subscription; the host also
    /// ends the room. Only the first call has an effect.
    pub async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Leaving room '{}'", self.room_id);
        if let Some(sync_task) = &self.sync_task {
            sync_task.abort();
        }
        self.peers.disconnect().await;
        if self.role.is_host()
            && let Err(e) = self.directory.end_room(&self.room_id).await
        {
            tracing::warn!("Failed to end room '{}': {}", self.room_id, e);
        }
    }
}

impl Drop for ListeningSession {
    fn drop(&mut self) {
        if let Some(sync_task) = &self.sync_task {
            sync_task.abort();
        }
    }
}
