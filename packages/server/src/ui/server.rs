//! Server execution logic.

use std::{sync::Arc, time::Duration};

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::{
    handler::{get_room_detail, get_room_playback, get_rooms, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Relay server
///
/// ```ignore
/// let state = Arc::new(AppState::in_memory(Arc::new(SystemClock), DEFAULT_HEARTBEAT_TIMEOUT));
/// Server::new(state, Duration::from_secs(5)).run("127.0.0.1", 8080).await?;
/// ```
pub struct Server {
    state: Arc<AppState>,
    sweep_interval: Duration,
}

impl Server {
    pub fn new(state: Arc<AppState>, sweep_interval: Duration) -> Self {
        Self {
            state,
            sweep_interval,
        }
    }

    /// Build the router with every endpoint
    pub fn router(&self) -> Router {
        Router::new()
            // WebSocket エンドポイント
            .route("/ws", get(websocket_handler))
            // HTTP エンドポイント
            .route("/api/health", get(health_check))
            .route("/api/rooms", get(get_rooms))
            .route("/api/rooms/{room_id}", get(get_room_detail))
            .route("/api/rooms/{room_id}/playback", get(get_room_playback))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Periodically disconnect participants whose heartbeat timed out
    fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let presence = self.state.presence_usecase.clone();
        let period = self.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let swept = presence.sweep().await;
                if !swept.is_empty() {
                    tracing::info!("Swept {} idle participant(s)", swept.len());
                }
            }
        })
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve_with_shutdown<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), std::io::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let sweeper = self.spawn_sweeper();

        tracing::info!("Relay server listening on {}", listener.local_addr()?);
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;
        sweeper.abort();
        result
    }

    /// Run the relay server
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: &str, port: u16) -> Result<(), std::io::Error> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;

        tracing::info!("Connect to: ws://{}/ws?participant_id=<id>", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        self.serve_with_shutdown(listener, shutdown_signal()).await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}
