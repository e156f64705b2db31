//! listenhall listening-party client.
//!
//! Hosts a room (captures media, serves viewers, drives the playback record)
//! or joins one as a viewer (connects to the host, follows playback).
//! Automatically reconnects on connection loss (max 5 attempts with 5 second interval).
//!
//! Run with:
//! ```not_rust
//! cargo run --bin listenhall-client -- host --room party --participant alice
//! cargo run --bin listenhall-client -- viewer --room party --participant bob
//! ```

use std::time::Duration;

use clap::{Parser, Subcommand};
use listenhall_client::{
    config::{ClientConfig, DEFAULT_URL},
    role::Role,
    runner::run_client,
};
use listenhall_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "listenhall-client")]
#[command(about = "Listening-party client: host a room or join one as a viewer", long_about = None)]
struct Args {
    #[command(subcommand)]
    role: RoleArg,

    /// Relay WebSocket URL
    #[arg(short = 'u', long, global = true, default_value = DEFAULT_URL)]
    url: String,

    /// Room to host or join
    #[arg(short = 'r', long, global = true, default_value = "lobby")]
    room: String,

    /// Participant ID (must be unique on the relay)
    #[arg(short = 'p', long, global = true)]
    participant: Option<String>,

    /// Seconds to wait for the signaling channel
    #[arg(long, global = true, default_value = "10")]
    join_timeout_secs: u64,

    /// Seconds before an unanswered negotiation is retried
    #[arg(long, global = true, default_value = "30")]
    negotiation_timeout_secs: u64,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum RoleArg {
    /// Start a room and broadcast to viewers
    Host,
    /// Join a live room
    Viewer,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Host => Role::Host,
            RoleArg::Viewer => Role::Viewer,
        }
    }
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let participant = args
        .participant
        .unwrap_or_else(|| format!("guest-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));

    let mut config = ClientConfig::new(args.url, args.room, participant);
    config.join_timeout = Duration::from_secs(args.join_timeout_secs);
    config.negotiation_timeout = Duration::from_secs(args.negotiation_timeout_secs);

    if let Err(e) = run_client(config, args.role.into()).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
