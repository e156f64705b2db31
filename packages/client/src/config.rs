//! Client configuration.

use std::time::Duration;

use crate::{
    media::MediaConstraints,
    peer::{NEGOTIATION_TIMEOUT, PeerManagerConfig, RetryPolicy},
    session::SessionOptions,
    signaling::JOIN_TIMEOUT,
    sync::{SNAP_THRESHOLD_MS, SyncConfig, TICK_INTERVAL},
};

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Relay WebSocket endpoint
    pub url: String,
    pub room_id: String,
    pub participant_id: String,
    pub join_timeout: Duration,
    pub retry: RetryPolicy,
    pub negotiation_timeout: Duration,
    pub tick_interval: Duration,
    pub snap_threshold_ms: i64,
    pub constraints: MediaConstraints,
    pub max_reconnect_attempts: u32,
    pub reconnect_interval: Duration,
}

impl ClientConfig {
    pub fn new(
        url: impl Into<String>,
        room_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            room_id: room_id.into(),
            participant_id: participant_id.into(),
            join_timeout: JOIN_TIMEOUT,
            retry: RetryPolicy::default(),
            negotiation_timeout: NEGOTIATION_TIMEOUT,
            tick_interval: TICK_INTERVAL,
            snap_threshold_ms: SNAP_THRESHOLD_MS,
            constraints: MediaConstraints::default(),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_interval: RECONNECT_INTERVAL,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            room_id: self.room_id.clone(),
            participant_id: self.participant_id.clone(),
            join_timeout: self.join_timeout,
            peer: PeerManagerConfig {
                retry: self.retry,
                negotiation_timeout: self.negotiation_timeout,
            },
            sync: SyncConfig {
                tick_interval: self.tick_interval,
                snap_threshold_ms: self.snap_threshold_ms,
            },
            constraints: self.constraints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        // テスト項目: 既定値が参加・交渉・同期の定数と一致する
        // given (前提条件):
        let config = ClientConfig::new(DEFAULT_URL, "party", "bob");

        // when (操作):
        let options = config.session_options();

        // then (期待する結果):
        assert_eq!(options.join_timeout, Duration::from_secs(10));
        assert_eq!(options.peer.retry.max_attempts, 5);
        assert_eq!(options.peer.retry.backoff, Duration::from_secs(3));
        assert_eq!(options.peer.negotiation_timeout, Duration::from_secs(30));
        assert_eq!(options.sync.tick_interval, Duration::from_millis(1000));
        assert_eq!(options.sync.snap_threshold_ms, 2000);
        assert_eq!(options, SessionOptions::new("party", "bob"));
    }
}
