//! Interactive client execution with reconnection support.

use std::{io::Write, sync::Arc};

use listenhall_shared::time::SystemClock;
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::mpsc;

use crate::{
    config::ClientConfig,
    error::SessionError,
    formatter::PlaybackFormatter,
    media::{RemoteStream, SyntheticMediaDevices},
    peer::{DescriptorConnector, PeerObserver},
    role::Role,
    session::{ListeningSession, SessionDeps},
    transport::{RelayConnection, TransportError},
};

/// Commands accepted by the host prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Play(String),
    Pause,
    Resume,
    /// Absolute position in seconds
    Seek(i64),
    Audio,
    Video,
    Status,
    Quit,
}

impl HostCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let argument = parts.next();
        match (command, argument) {
            ("play", Some(track)) => Ok(HostCommand::Play(track.to_string())),
            ("play", None) => Err("usage: play <track>".to_string()),
            ("pause", _) => Ok(HostCommand::Pause),
            ("resume", _) => Ok(HostCommand::Resume),
            ("seek", Some(secs)) => secs
                .parse::<i64>()
                .map(HostCommand::Seek)
                .map_err(|_| format!("invalid position: {}", secs)),
            ("seek", None) => Err("usage: seek <seconds>".to_string()),
            ("audio", _) => Ok(HostCommand::Audio),
            ("video", _) => Ok(HostCommand::Video),
            ("status", _) => Ok(HostCommand::Status),
            ("quit" | "exit", _) => Ok(HostCommand::Quit),
            (other, _) => Err(format!(
                "unknown command '{}' (play, pause, resume, seek, audio, video, status, quit)",
                other
            )),
        }
    }
}

/// Redisplay the prompt after printing a line
fn redisplay_prompt(participant_id: &str) {
    print!("{}> ", participant_id);
    std::io::stdout().flush().ok();
}

struct ConsoleObserver {
    participant_id: String,
}

impl PeerObserver for ConsoleObserver {
    fn on_remote_stream(&self, peer_id: &str, stream: RemoteStream) {
        println!(
            "\nReceiving stream '{}' from '{}' ({} track(s))",
            stream.id,
            peer_id,
            stream.tracks.len()
        );
        redisplay_prompt(&self.participant_id);
    }

    fn on_link_failed(&self, peer_id: &str, error: &SessionError) {
        tracing::error!("Link to '{}' failed: {}", peer_id, error);
    }
}

/// Run the client with reconnection logic
///
/// Gives up immediately on errors a reconnect cannot fix (identity in use,
/// media denied, room unavailable) and after the configured number of
/// attempts otherwise.
pub async fn run_client(config: ClientConfig, role: Role) -> Result<(), SessionError> {
    let mut reconnect_count = 0;

    loop {
        tracing::info!(
            "Attempting to connect to {} as '{}' ({}) (attempt {}/{})",
            config.url,
            config.participant_id,
            role,
            reconnect_count + 1,
            config.max_reconnect_attempts
        );

        match run_session(&config, role).await {
            Ok(()) => {
                tracing::info!("Client session ended normally");
                return Ok(());
            }
            Err(e) if !is_retriable(&e) => {
                tracing::error!("{}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Connection lost: {}", e);
                reconnect_count += 1;

                if reconnect_count >= config.max_reconnect_attempts {
                    tracing::error!(
                        "Failed to reconnect after {} attempts. Exiting.",
                        config.max_reconnect_attempts
                    );
                    return Err(e);
                }

                tracing::info!(
                    "Reconnecting in {:?}... (attempt {}/{})",
                    config.reconnect_interval,
                    reconnect_count + 1,
                    config.max_reconnect_attempts
                );
                tokio::time::sleep(config.reconnect_interval).await;
            }
        }
    }
}

fn is_retriable(error: &SessionError) -> bool {
    !matches!(
        error,
        SessionError::Transport(TransportError::DuplicateParticipant(_))
            | SessionError::MediaAccessDenied(_)
            | SessionError::RoomUnavailable(_)
            | SessionError::StateWriteRejected(_)
    )
}

async fn run_session(config: &ClientConfig, role: Role) -> Result<(), SessionError> {
    let connection =
        RelayConnection::connect_with_timeout(&config.url, &config.participant_id, config.join_timeout)
            .await?;
    let deps = SessionDeps::relay(
        connection.clone(),
        Arc::new(DescriptorConnector),
        Arc::new(SyntheticMediaDevices),
        Arc::new(SystemClock),
    );
    let observer = Arc::new(ConsoleObserver {
        participant_id: config.participant_id.clone(),
    });

    let result = match role {
        Role::Host => {
            let session =
                ListeningSession::start_as_host(config.session_options(), deps, observer).await?;
            let result = host_loop(&session, &connection).await;
            session.leave().await;
            result
        }
        Role::Viewer => {
            let session =
                ListeningSession::join_as_viewer(config.session_options(), deps, observer).await?;
            let result = viewer_loop(&session, &connection).await;
            session.leave().await;
            result
        }
    };
    connection.close();
    result
}

/// Spawn a blocking thread for rustyline (synchronous readline)
fn spawn_prompt(participant_id: String) -> mpsc::UnboundedReceiver<String> {
    let (input_tx, input_rx) = mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };
        let prompt = format!("{}> ", participant_id);

        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    input_rx
}

async fn host_loop(
    session: &ListeningSession,
    connection: &RelayConnection,
) -> Result<(), SessionError> {
    println!(
        "\nHosting room '{}' as '{}'. Commands: play <track>, pause, resume, seek <secs>, audio, video, status, quit\n",
        session.room_id(),
        session.participant_id()
    );
    let mut input_rx = spawn_prompt(session.participant_id().to_string());

    loop {
        tokio::select! {
            line = input_rx.recv() => {
                let Some(line) = line else {
                    return Ok(());
                };
                let command = match HostCommand::parse(&line) {
                    Ok(command) => command,
                    Err(usage) => {
                        println!("{}", usage);
                        continue;
                    }
                };
                if command == HostCommand::Quit {
                    return Ok(());
                }
                if let Err(e) = run_host_command(session, command).await {
                    match e {
                        SessionError::Transport(_) => return Err(e),
                        other => println!("{}", other),
                    }
                }
            }
            _ = connection.closed() => {
                return Err(SessionError::Transport(TransportError::Closed));
            }
        }
    }
}

async fn run_host_command(
    session: &ListeningSession,
    command: HostCommand,
) -> Result<(), SessionError> {
    match command {
        HostCommand::Play(track) => {
            session.play(&track).await?;
        }
        HostCommand::Pause => {
            session.pause().await?;
        }
        HostCommand::Resume => {
            session.resume().await?;
        }
        HostCommand::Seek(secs) => {
            session.seek(secs.saturating_mul(1000)).await?;
        }
        HostCommand::Audio => {
            let enabled = session.toggle_audio().await;
            println!("{}", PlaybackFormatter::format_toggle("audio", enabled));
            return Ok(());
        }
        HostCommand::Video => {
            let enabled = session.toggle_video().await;
            println!("{}", PlaybackFormatter::format_toggle("video", enabled));
            return Ok(());
        }
        HostCommand::Status => {
            println!(
                "{}",
                PlaybackFormatter::format_links(&session.peers().links().await)
            );
        }
        HostCommand::Quit => return Ok(()),
    }
    println!(
        "{}",
        PlaybackFormatter::format_view(&session.playback_view().await)
    );
    Ok(())
}

async fn viewer_loop(
    session: &ListeningSession,
    connection: &RelayConnection,
) -> Result<(), SessionError> {
    println!(
        "\nWatching room '{}' hosted by '{}'. Press Ctrl+C to leave.\n",
        session.room_id(),
        session.host_id()
    );
    let mut updates = session.view_updates();
    let mut last_line = String::new();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    return Err(SessionError::Transport(TransportError::Closed));
                }
                let line = PlaybackFormatter::format_view(&updates.borrow_and_update());
                if line != last_line {
                    println!("{}", line);
                    last_line = line;
                }
            }
            _ = session.peers().signaling_lost() => {
                return Err(SessionError::Transport(TransportError::Closed));
            }
            _ = connection.closed() => {
                return Err(SessionError::Transport(TransportError::Closed));
            }
            _ = tokio::signal::ctrl_c() => {
                return Ok(());
            }
        }
    }
}
