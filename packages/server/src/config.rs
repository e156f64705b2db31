//! Server configuration.

use std::time::Duration;

use crate::usecase::presence::DEFAULT_HEARTBEAT_TIMEOUT;

/// Runtime settings of the relay server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Connections silent for longer than this are marked left
    pub heartbeat_timeout: Duration,
    /// Period of the idle-connection sweep
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            sweep_interval: Duration::from_secs(5),
        }
    }
}
