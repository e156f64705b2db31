//! Per-remote link state machine.
//!
//! ```text
//! New -> Negotiating -> Connected -> Closed
//!           |               |
//!           +---- fail -----+--> (retry) Closed -> New ...  | Failed
//! ```
//!
//! Only the initiating side retries; a responder simply drops the link and
//! waits for the next offer.

use std::{collections::HashSet, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    New,
    Negotiating,
    Connected,
    Closed,
    /// Retries exhausted
    Failed,
}

/// Bounded retry of failed negotiations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(3),
        }
    }
}

/// What to do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Recreate the connection after the delay
    RetryAfter(Duration),
    /// Retries exhausted, the link is `Failed`
    GiveUp,
    /// Responder side: forget the link
    Drop,
    /// The link was already torn down
    Ignore,
}

#[derive(Debug, Clone)]
pub struct PeerLink {
    remote_id: String,
    initiator: bool,
    state: LinkState,
    failures: u32,
    disconnected: bool,
    streams: HashSet<String>,
}

impl PeerLink {
    pub fn new(remote_id: impl Into<String>, initiator: bool) -> Self {
        Self {
            remote_id: remote_id.into(),
            initiator,
            state: LinkState::New,
            failures: 0,
            disconnected: false,
            streams: HashSet::new(),
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn initiator(&self) -> bool {
        self.initiator
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// A connection was created for the link
    pub fn begin(&mut self) {
        if self.state == LinkState::New {
            self.state = LinkState::Negotiating;
        }
    }

    /// Negotiation completed
    pub fn connected(&mut self) {
        if matches!(self.state, LinkState::New | LinkState::Negotiating) {
            self.state = LinkState::Connected;
            self.failures = 0;
        }
    }

    /// Record a failure (error, timeout or unexpected close)
    pub fn fail(&mut self, policy: &RetryPolicy) -> Recovery {
        if self.disconnected || matches!(self.state, LinkState::Closed | LinkState::Failed) {
            return Recovery::Ignore;
        }
        if !self.initiator {
            self.state = LinkState::Closed;
            return Recovery::Drop;
        }

        self.failures += 1;
        if self.failures >= policy.max_attempts {
            self.state = LinkState::Failed;
            Recovery::GiveUp
        } else {
            self.state = LinkState::Closed;
            Recovery::RetryAfter(policy.backoff)
        }
    }

    /// Start over after a backoff. Returns false when the link is no longer retriable.
    pub fn retry(&mut self) -> bool {
        if self.disconnected || self.state != LinkState::Closed {
            return false;
        }
        self.state = LinkState::New;
        self.streams.clear();
        true
    }

    /// Deliberate teardown; later failures are ignored
    pub fn disconnect(&mut self) {
        self.disconnected = true;
        if self.state != LinkState::Failed {
            self.state = LinkState::Closed;
        }
    }

    /// Whether the link is live or on its way there
    pub fn is_active(&self) -> bool {
        !self.disconnected
            && matches!(
                self.state,
                LinkState::New | LinkState::Negotiating | LinkState::Connected
            )
    }

    /// Whether a stream announcement should reach the observer.
    /// Each stream id is handed over once per link.
    pub fn accept_stream(&mut self, stream_id: &str) -> bool {
        self.streams.insert(stream_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        // テスト項目: NEW → NEGOTIATING → CONNECTED → CLOSED と遷移する
        // given (前提条件):
        let mut link = PeerLink::new("host", true);
        assert_eq!(link.state(), LinkState::New);

        // when (操作):
        link.begin();
        let negotiating = link.state();
        link.connected();
        let connected = link.state();
        link.disconnect();

        // then (期待する結果):
        assert_eq!(negotiating, LinkState::Negotiating);
        assert_eq!(connected, LinkState::Connected);
        assert_eq!(link.state(), LinkState::Closed);
        assert!(!link.is_active());
    }

    #[test]
    fn test_initiator_gives_up_after_five_failures() {
        // テスト項目: 初期化側は 5 回目の失敗で FAILED になり、それまでは 3 秒後に再試行する
        // given (前提条件):
        let policy = RetryPolicy::default();
        let mut link = PeerLink::new("host", true);
        let mut recoveries = Vec::new();

        // when (操作):
        for _ in 0..5 {
            link.begin();
            let recovery = link.fail(&policy);
            recoveries.push(recovery);
            link.retry();
        }

        // then (期待する結果):
        assert_eq!(
            recoveries,
            vec![
                Recovery::RetryAfter(Duration::from_secs(3)),
                Recovery::RetryAfter(Duration::from_secs(3)),
                Recovery::RetryAfter(Duration::from_secs(3)),
                Recovery::RetryAfter(Duration::from_secs(3)),
                Recovery::GiveUp,
            ]
        );
        assert_eq!(link.state(), LinkState::Failed);
        assert!(!link.retry());
        assert_eq!(link.fail(&policy), Recovery::Ignore);
    }

    #[test]
    fn test_successful_connection_resets_failure_count() {
        // テスト項目: 接続に成功すると失敗回数がリセットされる
        let policy = RetryPolicy::default();
        let mut link = PeerLink::new("host", true);
        link.begin();
        link.fail(&policy);
        link.retry();
        link.begin();
        link.connected();
        assert_eq!(link.failures(), 0);
    }

    #[test]
    fn test_responder_drops_instead_of_retrying() {
        // テスト項目: 応答側のリンクは失敗時に再試行せず破棄される
        let mut link = PeerLink::new("viewer", false);
        link.begin();
        assert_eq!(link.fail(&RetryPolicy::default()), Recovery::Drop);
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_failure_after_disconnect_is_ignored() {
        // テスト項目: 意図的な切断後の失敗は無視され、再試行もされない
        // given (前提条件):
        let mut link = PeerLink::new("host", true);
        link.begin();
        link.disconnect();

        // when (操作):
        let recovery = link.fail(&RetryPolicy::default());

        // then (期待する結果):
        assert_eq!(recovery, Recovery::Ignore);
        assert!(!link.retry());
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn test_stream_is_accepted_once_per_id() {
        // テスト項目: 同じストリーム ID は 1 度しか受け付けない
        let mut link = PeerLink::new("host", true);
        assert!(link.accept_stream("s1"));
        assert!(!link.accept_stream("s1"));
        assert!(link.accept_stream("s2"));
    }
}
