//! listenhall relay server.
//!
//! Hosts the signaling channels and the per-room playback records.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin listenhall-server
//! cargo run --bin listenhall-server -- --host 0.0.0.0 --port 3000
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use listenhall_server::{
    config::ServerConfig,
    ui::{AppState, Server},
};
use listenhall_shared::{logger::setup_logger, time::SystemClock};

#[derive(Parser, Debug)]
#[command(name = "listenhall-server")]
#[command(about = "Signaling relay and playback record store for listening parties", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Seconds without any frame before a participant is marked left
    #[arg(long, default_value = "30")]
    heartbeat_timeout_secs: u64,

    /// Seconds between idle-connection sweeps
    #[arg(long, default_value = "5")]
    sweep_interval_secs: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs.max(1)),
        }
    }
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let config = ServerConfig::from(Args::parse());

    let state = Arc::new(AppState::in_memory(
        Arc::new(SystemClock),
        config.heartbeat_timeout,
    ));
    let server = Server::new(state, config.sweep_interval);
    if let Err(e) = server.run(&config.host, config.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
