//! Playback synchronization.
//!
//! The host writes timestamped [`PlaybackState`] snapshots; viewers
//! extrapolate the position locally between writes and only correct
//! themselves when the gap to the host grows past a threshold. There is no
//! authoritative clock: host and viewer wall clocks are trusted as they are.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use listenhall_shared::{protocol::PlaybackState, time::Clock};
use tokio::sync::{Mutex, mpsc, watch};

use crate::{error::SessionError, role::Role, transport::TransportError};

/// Period of the viewer's local position refresh
pub const TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Minimum gap between the displayed and the host-derived position that is corrected
pub const SNAP_THRESHOLD_MS: i64 = 2000;

/// Position of `state` at wall-clock time `now_ms`.
///
/// A playing state advances with elapsed time; a paused one is frozen.
/// A state without a track is at position 0.
pub fn compute_local_position(state: &PlaybackState, now_ms: i64) -> i64 {
    if state.track_id.is_none() {
        return 0;
    }
    if state.playing {
        state
            .position_ms
            .saturating_add(now_ms.saturating_sub(state.last_update))
    } else {
        state.position_ms
    }
}

// ========================================
// Record store
// ========================================

/// Row-per-room store of the playback record with change subscription.
#[async_trait]
pub trait PlaybackStore: Send + Sync {
    /// Replace the row of `room_id`
    async fn upsert(&self, room_id: &str, state: PlaybackState) -> Result<(), TransportError>;

    /// Follow the row of `room_id`. The current row is delivered first.
    async fn watch(
        &self,
        room_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<PlaybackState>, TransportError>;
}

#[derive(Default)]
struct StoreState {
    rows: HashMap<String, PlaybackState>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<PlaybackState>>>,
}

/// In-process [`PlaybackStore`]
#[derive(Clone, Default)]
pub struct InMemoryPlaybackStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryPlaybackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, room_id: &str) -> Option<PlaybackState> {
        self.state.lock().await.rows.get(room_id).cloned()
    }
}

#[async_trait]
impl PlaybackStore for InMemoryPlaybackStore {
    async fn upsert(&self, room_id: &str, state: PlaybackState) -> Result<(), TransportError> {
        let mut store = self.state.lock().await;
        store.rows.insert(room_id.to_string(), state.clone());
        if let Some(watchers) = store.watchers.get_mut(room_id) {
            watchers.retain(|tx| tx.send(state.clone()).is_ok());
        }
        Ok(())
    }

    async fn watch(
        &self,
        room_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<PlaybackState>, TransportError> {
        let mut store = self.state.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let current = store.rows.get(room_id).cloned().unwrap_or_default();
        let _ = tx.send(current);
        store
            .watchers
            .entry(room_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

/// Invoke `on_change` with every state written to `room_id`.
pub async fn subscribe_to_state<F>(
    store: &dyn PlaybackStore,
    room_id: &str,
    mut on_change: F,
) -> Result<tokio::task::JoinHandle<()>, TransportError>
where
    F: FnMut(PlaybackState) + Send + 'static,
{
    let mut updates = store.watch(room_id).await?;
    Ok(tokio::spawn(async move {
        while let Some(state) = updates.recv().await {
            on_change(state);
        }
    }))
}

// ========================================
// Host side
// ========================================

/// Writer of a room's playback record.
///
/// Only a participant holding the host role may write; anyone else gets
/// [`SessionError::StateWriteRejected`] before anything reaches the store.
pub struct PlaybackHost {
    room_id: String,
    role: Role,
    store: Arc<dyn PlaybackStore>,
    clock: Arc<dyn Clock>,
}

impl PlaybackHost {
    pub fn new(
        room_id: impl Into<String>,
        role: Role,
        store: Arc<dyn PlaybackStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            role,
            store,
            clock,
        }
    }

    /// Write a snapshot stamped with the current wall-clock time.
    pub async fn host_set_state(
        &self,
        track_id: Option<String>,
        position_ms: i64,
        playing: bool,
    ) -> Result<PlaybackState, SessionError> {
        if !self.role.is_host() {
            return Err(SessionError::StateWriteRejected(format!(
                "a {} cannot write the playback of room '{}'",
                self.role, self.room_id
            )));
        }
        let state = PlaybackState::new(track_id, position_ms, playing, self.clock.now_millis());
        self.store.upsert(&self.room_id, state.clone()).await?;
        tracing::debug!(
            "Playback of '{}' set to {:?} @ {}ms ({})",
            self.room_id,
            state.track_id,
            state.position_ms,
            if state.playing { "playing" } else { "paused" }
        );
        Ok(state)
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }
}

// ========================================
// Viewer side
// ========================================

/// What a viewer currently shows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaybackView {
    pub track_id: Option<String>,
    pub position_ms: i64,
    pub playing: bool,
}

/// Outcome of applying a host push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// The displayed position jumped to the host-derived value
    Snapped,
    /// The displayed position was kept
    Kept,
}

/// Locally displayed position of a viewer.
///
/// Between host pushes the displayed position advances by elapsed wall-clock
/// time while playing. A push snaps the display to the host-derived position
/// when the track changed or the gap is at least the threshold; smaller gaps
/// are left alone.
#[derive(Debug, Clone)]
pub struct ViewerPlayback {
    latest: Option<PlaybackState>,
    displayed_ms: i64,
    last_tick_ms: i64,
    snap_threshold_ms: i64,
}

impl Default for ViewerPlayback {
    fn default() -> Self {
        Self::new(SNAP_THRESHOLD_MS)
    }
}

impl ViewerPlayback {
    pub fn new(snap_threshold_ms: i64) -> Self {
        Self {
            latest: None,
            displayed_ms: 0,
            last_tick_ms: 0,
            snap_threshold_ms,
        }
    }

    /// Apply a state pushed by the host, received at `now_ms`.
    pub fn apply(&mut self, state: PlaybackState, now_ms: i64) -> Correction {
        let host_position = compute_local_position(&state, now_ms);
        let track_changed = self
            .latest
            .as_ref()
            .is_none_or(|latest| latest.track_id != state.track_id);
        let gap = (self.displayed_ms - host_position).abs();

        let correction = if track_changed || gap >= self.snap_threshold_ms {
            self.displayed_ms = host_position;
            Correction::Snapped
        } else {
            Correction::Kept
        };
        self.latest = Some(state);
        self.last_tick_ms = now_ms;
        correction
    }

    /// Advance the displayed position to `now_ms` and return it.
    pub fn tick(&mut self, now_ms: i64) -> i64 {
        if let Some(latest) = &self.latest
            && latest.playing
            && latest.track_id.is_some()
        {
            self.displayed_ms = self
                .displayed_ms
                .saturating_add(now_ms.saturating_sub(self.last_tick_ms).max(0));
        }
        self.last_tick_ms = now_ms;
        self.displayed_ms
    }

    pub fn displayed_ms(&self) -> i64 {
        self.displayed_ms
    }

    pub fn view(&self) -> PlaybackView {
        match &self.latest {
            Some(state) => PlaybackView {
                track_id: state.track_id.clone(),
                position_ms: if state.track_id.is_some() {
                    self.displayed_ms
                } else {
                    0
                },
                playing: state.playing,
            },
            None => PlaybackView::default(),
        }
    }
}

/// Timing of the viewer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub tick_interval: Duration,
    pub snap_threshold_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: TICK_INTERVAL,
            snap_threshold_ms: SNAP_THRESHOLD_MS,
        }
    }
}

/// Drive a [`ViewerPlayback`] from host pushes and a fixed tick, publishing
/// the view after every change.
///
/// Returns when the update stream ends or nobody observes the view anymore.
pub async fn run_viewer_loop(
    mut updates: mpsc::UnboundedReceiver<PlaybackState>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    view: watch::Sender<PlaybackView>,
) {
    let mut playback = ViewerPlayback::new(config.snap_threshold_ms);
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(state) = update else {
                    tracing::debug!("Playback updates ended");
                    break;
                };
                let correction = playback.apply(state, clock.now_millis());
                tracing::debug!("Host push applied: {:?} -> {}ms", correction, playback.displayed_ms());
            }
            _ = interval.tick() => {
                playback.tick(clock.now_millis());
            }
        }
        if view.send(playback.view()).is_err() {
            break;
        }
    }
}
