//! Link bookkeeping on top of signaling and a [`PeerConnector`].
//!
//! Every link carries a generation number. Tasks spawned for a connection
//! (event pump, negotiation timer, delayed retry) check it before acting, so
//! events from a replaced or torn-down connection are ignored.
//!
//! A `bye` from the remote side closes its link like any other failure. On the
//! host, ICE candidates that overtake their offer are held for a short while
//! and fed to the connection right after the offer.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::{FutureExt, future::BoxFuture};
use listenhall_shared::protocol::{SignalKind, SignalMessage};
use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::Instant,
};

use super::{
    LinkState, PeerConnection, PeerConnector, PeerEvent, PeerLink, PeerOptions, Recovery,
    RetryPolicy,
};
use crate::{
    error::SessionError,
    media::{MediaStream, RemoteStream},
    signaling::{SignalInbox, SignalingHandle},
};

/// Default cap on a single negotiation attempt
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a candidate that arrived before its offer is kept
const EARLY_CANDIDATE_TTL: Duration = Duration::from_secs(10);

/// Held candidates per remote participant
const MAX_EARLY_CANDIDATES: usize = 32;

/// Receiver of link outcomes, registered when the manager starts
pub trait PeerObserver: Send + Sync {
    /// A remote stream became available. Called once per stream id per link.
    fn on_remote_stream(&self, peer_id: &str, stream: RemoteStream);

    /// A link exhausted its retries
    fn on_link_failed(&self, _peer_id: &str, _error: &SessionError) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerManagerConfig {
    pub retry: RetryPolicy,
    pub negotiation_timeout: Duration,
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            negotiation_timeout: NEGOTIATION_TIMEOUT,
        }
    }
}

struct LinkEntry {
    link: PeerLink,
    generation: u64,
    connection: Option<Arc<dyn PeerConnection>>,
}

#[derive(Default)]
struct ManagerState {
    links: HashMap<String, LinkEntry>,
    local_stream: Option<MediaStream>,
    is_host: bool,
    disconnected: bool,
    early_candidates: HashMap<String, Vec<(Instant, Value)>>,
}

impl ManagerState {
    fn hold_early_candidate(&mut self, from: &str, payload: Value) {
        let now = Instant::now();
        self.early_candidates.retain(|_, held| {
            held.retain(|(at, _)| now.duration_since(*at) < EARLY_CANDIDATE_TTL);
            !held.is_empty()
        });
        let held = self.early_candidates.entry(from.to_string()).or_default();
        if held.len() < MAX_EARLY_CANDIDATES {
            held.push((now, payload));
            tracing::debug!("Holding candidate from '{}' until its offer", from);
        } else {
            tracing::debug!("Dropping candidate from '{}' (too many held)", from);
        }
    }

    fn take_early_candidates(&mut self, from: &str) -> Vec<Value> {
        let now = Instant::now();
        self.early_candidates
            .remove(from)
            .unwrap_or_default()
            .into_iter()
            .filter(|(at, _)| now.duration_since(*at) < EARLY_CANDIDATE_TTL)
            .map(|(_, payload)| payload)
            .collect()
    }
}

struct Shared {
    local_id: String,
    signaling: SignalingHandle,
    connector: Arc<dyn PeerConnector>,
    observer: Arc<dyn PeerObserver>,
    config: PeerManagerConfig,
    state: Mutex<ManagerState>,
    generations: AtomicU64,
    signaling_lost: watch::Sender<bool>,
}

/// Peer links of one participant
pub struct PeerManager {
    shared: Arc<Shared>,
    dispatcher: JoinHandle<()>,
}

impl PeerManager {
    /// Start dispatching the signaling inbox to links.
    pub fn start(
        signaling: SignalingHandle,
        inbox: SignalInbox,
        connector: Arc<dyn PeerConnector>,
        observer: Arc<dyn PeerObserver>,
        config: PeerManagerConfig,
    ) -> Self {
        let (signaling_lost, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            local_id: signaling.participant_id().to_string(),
            signaling,
            connector,
            observer,
            config,
            state: Mutex::new(ManagerState::default()),
            generations: AtomicU64::new(0),
            signaling_lost,
        });
        let dispatcher = tokio::spawn(dispatch(shared.clone(), inbox));
        Self { shared, dispatcher }
    }

    pub fn local_id(&self) -> &str {
        &self.shared.local_id
    }

    /// Serve `stream` to every viewer that sends an offer
    pub async fn initialize_as_host(&self, stream: MediaStream) {
        let mut state = self.shared.state.lock().await;
        state.is_host = true;
        tracing::info!(
            "Hosting stream '{}' with {} track(s)",
            stream.id,
            stream.tracks.len()
        );
        if let Some(previous) = state.local_stream.replace(stream) {
            previous.stop();
        }
    }

    /// Swap the served stream on every link without renegotiating.
    /// The previous stream is released.
    pub async fn replace_local_stream(&self, stream: MediaStream) {
        let (previous, connections) = {
            let mut state = self.shared.state.lock().await;
            let connections: Vec<(String, Arc<dyn PeerConnection>)> = state
                .links
                .iter()
                .filter_map(|(peer, entry)| {
                    entry
                        .connection
                        .as_ref()
                        .map(|connection| (peer.clone(), connection.clone()))
                })
                .collect();
            (state.local_stream.replace(stream.clone()), connections)
        };

        for (peer, connection) in connections {
            for track in &stream.tracks {
                if let Err(e) = connection.replace_track(track.clone()).await {
                    tracing::warn!("Failed to replace {:?} track for '{}': {}", track.kind, peer, e);
                }
            }
        }
        if let Some(previous) = previous
            && previous.id != stream.id
        {
            previous.stop();
        }
    }

    /// Flip the local audio track. `None` when there is no audio track.
    pub async fn toggle_local_audio(&self) -> Option<bool> {
        let state = self.shared.state.lock().await;
        state
            .local_stream
            .as_ref()
            .and_then(MediaStream::audio_track)
            .map(|track| track.toggle())
    }

    /// Flip the local video track. `None` when there is no video track.
    pub async fn toggle_local_video(&self) -> Option<bool> {
        let state = self.shared.state.lock().await;
        state
            .local_stream
            .as_ref()
            .and_then(MediaStream::video_track)
            .map(|track| track.toggle())
    }

    /// Open an initiating link to the host. A no-op while a link to it is active.
    pub async fn connect_to_host(&self, host_id: &str) -> Result<(), SessionError> {
        if host_id == self.shared.local_id {
            return Err(SessionError::PeerNegotiationFailed {
                peer: host_id.to_string(),
                reason: "cannot connect to self".to_string(),
            });
        }
        {
            let mut state = self.shared.state.lock().await;
            if state.disconnected {
                return Err(SessionError::PeerNegotiationFailed {
                    peer: host_id.to_string(),
                    reason: "peer manager is disconnected".to_string(),
                });
            }
            match state.links.get(host_id).map(|entry| entry.link.is_active()) {
                Some(true) => {
                    tracing::debug!("Link to '{}' already active", host_id);
                    return Ok(());
                }
                Some(false) => {
                    state.links.remove(host_id);
                }
                None => {}
            }
        }
        tracing::info!("Connecting to host '{}'", host_id);
        open_link(self.shared.clone(), host_id.to_string(), true).await;
        Ok(())
    }

    pub async fn link_state(&self, peer_id: &str) -> Option<LinkState> {
        let state = self.shared.state.lock().await;
        state.links.get(peer_id).map(|entry| entry.link.state())
    }

    /// Every known link, ordered by peer id
    pub async fn links(&self) -> Vec<(String, LinkState)> {
        let state = self.shared.state.lock().await;
        let mut links: Vec<(String, LinkState)> = state
            .links
            .iter()
            .map(|(peer, entry)| (peer.clone(), entry.link.state()))
            .collect();
        links.sort_by(|a, b| a.0.cmp(&b.0));
        links
    }

    /// Resolve once the signaling subscription is gone
    pub async fn signaling_lost(&self) {
        let mut lost = self.shared.signaling_lost.subscribe();
        let _ = lost.wait_for(|lost| *lost).await;
    }

    /// Tear everything down: links, local tracks and the signaling
    /// subscription. Every peer with an active link is sent a `bye` first.
    /// Only the first call has an effect.
    pub async fn disconnect(&self) {
        let (peers, connections, stream) = {
            let mut state = self.shared.state.lock().await;
            if state.disconnected {
                return;
            }
            state.disconnected = true;
            state.early_candidates.clear();
            let peers: Vec<String> = state
                .links
                .iter()
                .filter(|(_, entry)| entry.link.is_active())
                .map(|(peer, _)| peer.clone())
                .collect();
            let connections: Vec<Arc<dyn PeerConnection>> = state
                .links
                .values_mut()
                .filter_map(|entry| {
                    entry.link.disconnect();
                    entry.connection.take()
                })
                .collect();
            (peers, connections, state.local_stream.take())
        };
        tracing::info!(
            "Disconnecting '{}' ({} connection(s))",
            self.shared.local_id,
            connections.len()
        );

        self.dispatcher.abort();
        for peer in peers {
            let bye =
                SignalMessage::unicast(SignalKind::Bye, &self.shared.local_id, &peer, Value::Null);
            if let Err(e) = self.shared.signaling.send(&bye).await {
                tracing::warn!("Failed to say bye to '{}': {}", peer, e);
            }
        }
        for connection in connections {
            connection.close().await;
        }
        if let Some(stream) = stream {
            stream.stop();
        }
        self.shared.signaling.leave().await;
    }
}

impl Drop for PeerManager {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

async fn dispatch(shared: Arc<Shared>, mut inbox: SignalInbox) {
    while let Some(msg) = inbox.recv().await {
        handle_signal(&shared, msg).await;
    }
    tracing::warn!("Signaling subscription of '{}' ended", shared.local_id);
    let _ = shared.signaling_lost.send(true);
}

/// What an inbound signal leads to
enum Inbound {
    /// Feed the signal to the link's connection
    Deliver(Arc<dyn PeerConnection>, u64),
    /// An offer on the host: open a fresh responder link
    Open,
    /// The remote side tore down its connection
    RemoteClosed(u64),
}

async fn handle_signal(shared: &Arc<Shared>, msg: SignalMessage) {
    let inbound = {
        let mut state = shared.state.lock().await;
        if state.disconnected {
            return;
        }
        let active = state
            .links
            .get(&msg.from)
            .filter(|entry| entry.link.is_active())
            .map(|entry| (entry.connection.clone(), entry.generation));

        match (msg.r#type, active) {
            (SignalKind::Offer, _) if state.is_host => Inbound::Open,
            (SignalKind::Bye, Some((_, generation))) => Inbound::RemoteClosed(generation),
            (SignalKind::Bye, None) => return,
            (_, Some((Some(connection), generation))) => Inbound::Deliver(connection, generation),
            (SignalKind::IceCandidate, None) if state.is_host => {
                state.hold_early_candidate(&msg.from, msg.signal);
                return;
            }
            (kind, _) => {
                tracing::debug!(
                    "Dropping stray {:?} from '{}' (no active link)",
                    kind,
                    msg.from
                );
                return;
            }
        }
    };

    match inbound {
        Inbound::Deliver(connection, generation) => {
            deliver(shared, &connection, generation, &msg.from, msg.r#type, msg.signal).await;
        }
        Inbound::RemoteClosed(generation) => {
            tracing::info!("'{}' closed its side of the link", msg.from);
            handle_failure(shared.clone(), msg.from, generation, "remote closed".to_string())
                .await;
        }
        Inbound::Open => {
            // Every offer starts a fresh responder link
            tracing::info!("Offer from '{}'", msg.from);
            let Some((connection, generation)) =
                open_link(shared.clone(), msg.from.clone(), false).await
            else {
                return;
            };
            if !deliver(shared, &connection, generation, &msg.from, msg.r#type, msg.signal).await {
                return;
            }
            let early = shared
                .state
                .lock()
                .await
                .take_early_candidates(&msg.from);
            for payload in early {
                let kind = SignalKind::IceCandidate;
                if !deliver(shared, &connection, generation, &msg.from, kind, payload).await {
                    return;
                }
            }
        }
    }
}

/// Feed one signal to a connection. A rejection fails the link.
async fn deliver(
    shared: &Arc<Shared>,
    connection: &Arc<dyn PeerConnection>,
    generation: u64,
    from: &str,
    kind: SignalKind,
    payload: Value,
) -> bool {
    match connection.signal(kind, payload).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("{:?} from '{}' rejected: {}", kind, from, e);
            handle_failure(shared.clone(), from.to_string(), generation, e.to_string()).await;
            false
        }
    }
}

/// Create a connection for the link to `remote_id` and start its tasks.
///
/// An initiating link keeps its history (retry count); a responder link is
/// always recreated. Returns the new connection unless it was superseded.
fn open_link(
    shared: Arc<Shared>,
    remote_id: String,
    initiator: bool,
) -> BoxFuture<'static, Option<(Arc<dyn PeerConnection>, u64)>> {
    async move {
        let generation = shared.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (stream, replaced) = {
            let mut state = shared.state.lock().await;
            if state.disconnected {
                return None;
            }
            let replaced = match state.links.remove(&remote_id) {
                Some(mut entry) if initiator => {
                    let replaced = entry.connection.take();
                    entry.generation = generation;
                    state.links.insert(remote_id.clone(), entry);
                    replaced
                }
                Some(mut entry) => entry.connection.take(),
                None => None,
            };
            let entry = state
                .links
                .entry(remote_id.clone())
                .or_insert_with(|| LinkEntry {
                    link: PeerLink::new(remote_id.clone(), initiator),
                    generation,
                    connection: None,
                });
            entry.link.begin();
            (state.local_stream.clone(), replaced)
        };
        if let Some(replaced) = replaced {
            replaced.close().await;
        }

        let options = PeerOptions {
            remote_id: remote_id.clone(),
            initiator,
            stream,
        };
        let handle = match shared.connector.create(options).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Could not create connection to '{}': {}", remote_id, e);
                handle_failure(shared, remote_id, generation, e.to_string()).await;
                return None;
            }
        };

        let connection: Arc<dyn PeerConnection> = Arc::from(handle.connection);
        let attached = {
            let mut state = shared.state.lock().await;
            let disconnected = state.disconnected;
            match state.links.get_mut(&remote_id) {
                Some(entry) if entry.generation == generation && !disconnected => {
                    entry.connection = Some(connection.clone());
                    true
                }
                _ => false,
            }
        };
        if !attached {
            connection.close().await;
            return None;
        }

        tokio::spawn(pump(
            shared.clone(),
            remote_id.clone(),
            generation,
            handle.events,
        ));
        tokio::spawn(negotiation_timer(shared, remote_id, generation));
        Some((connection, generation))
    }
    .boxed()
}

/// Forward connection events until the connection ends or is superseded
async fn pump(
    shared: Arc<Shared>,
    remote_id: String,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<PeerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::Signal { kind, payload } => {
                if !is_current(&shared, &remote_id, generation).await {
                    break;
                }
                let msg = SignalMessage::unicast(kind, &shared.local_id, &remote_id, payload);
                if let Err(e) = shared.signaling.send(&msg).await {
                    tracing::warn!("Failed to send {:?} to '{}': {}", kind, remote_id, e);
                }
            }
            PeerEvent::Connected => {
                let mut state = shared.state.lock().await;
                match state.links.get_mut(&remote_id) {
                    Some(entry) if entry.generation == generation => {
                        entry.link.connected();
                        tracing::info!("Link to '{}' connected", remote_id);
                    }
                    _ => break,
                }
            }
            PeerEvent::Stream(stream) => {
                let accepted = {
                    let mut state = shared.state.lock().await;
                    match state.links.get_mut(&remote_id) {
                        Some(entry) if entry.generation == generation => {
                            entry.link.accept_stream(&stream.id)
                        }
                        _ => break,
                    }
                };
                if accepted {
                    tracing::info!("Remote stream '{}' from '{}'", stream.id, remote_id);
                    shared.observer.on_remote_stream(&remote_id, stream);
                } else {
                    tracing::debug!("Duplicate stream '{}' from '{}'", stream.id, remote_id);
                }
            }
            PeerEvent::Closed => {
                handle_failure(shared, remote_id, generation, "connection closed".to_string())
                    .await;
                return;
            }
            PeerEvent::Error(reason) => {
                handle_failure(shared, remote_id, generation, reason).await;
                return;
            }
        }
    }
}

async fn negotiation_timer(shared: Arc<Shared>, remote_id: String, generation: u64) {
    tokio::time::sleep(shared.config.negotiation_timeout).await;
    let timed_out = {
        let state = shared.state.lock().await;
        state.links.get(&remote_id).is_some_and(|entry| {
            entry.generation == generation
                && matches!(entry.link.state(), LinkState::New | LinkState::Negotiating)
        })
    };
    if timed_out {
        tracing::warn!(
            "Negotiation with '{}' timed out after {:?}",
            remote_id,
            shared.config.negotiation_timeout
        );
        handle_failure(
            shared,
            remote_id,
            generation,
            "negotiation timed out".to_string(),
        )
        .await;
    }
}

async fn is_current(shared: &Shared, remote_id: &str, generation: u64) -> bool {
    let state = shared.state.lock().await;
    !state.disconnected
        && state
            .links
            .get(remote_id)
            .is_some_and(|entry| entry.generation == generation)
}

async fn handle_failure(shared: Arc<Shared>, remote_id: String, generation: u64, reason: String) {
    let (recovery, connection) = {
        let mut state = shared.state.lock().await;
        let Some(entry) = state.links.get_mut(&remote_id) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        let recovery = entry.link.fail(&shared.config.retry);
        let connection = entry.connection.take();
        if recovery == Recovery::Drop {
            state.links.remove(&remote_id);
        }
        (recovery, connection)
    };
    if let Some(connection) = connection {
        connection.close().await;
    }

    match recovery {
        Recovery::RetryAfter(delay) => {
            tracing::warn!(
                "Link to '{}' failed ({}), retrying in {:?}",
                remote_id,
                reason,
                delay
            );
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                retry_link(shared, remote_id, generation).await;
            });
        }
        Recovery::GiveUp => {
            tracing::error!("Link to '{}' failed for good: {}", remote_id, reason);
            let error = SessionError::PeerNegotiationFailed {
                peer: remote_id.clone(),
                reason,
            };
            shared.observer.on_link_failed(&remote_id, &error);
        }
        Recovery::Drop => {
            tracing::debug!("Responder link to '{}' dropped: {}", remote_id, reason);
        }
        Recovery::Ignore => {}
    }
}

async fn retry_link(shared: Arc<Shared>, remote_id: String, generation: u64) {
    {
        let mut state = shared.state.lock().await;
        if state.disconnected {
            return;
        }
        let Some(entry) = state.links.get_mut(&remote_id) else {
            return;
        };
        if entry.generation != generation || !entry.link.retry() {
            return;
        }
    }
    tracing::info!("Retrying link to '{}'", remote_id);
    open_link(shared, remote_id, true).await;
}
