//! Metadata-only peer connections.
//!
//! Runs the offer/answer/candidate exchange for real over signaling but only
//! carries stream descriptors, no media. Lets sessions, CLIs and tests run
//! the full negotiation flow without a media stack.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use listenhall_shared::protocol::SignalKind;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

use super::{PeerConnection, PeerConnector, PeerError, PeerEvent, PeerHandle, PeerOptions};
use crate::media::{LocalTrack, RemoteStream};

#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorConnector;

#[async_trait]
impl PeerConnector for DescriptorConnector {
    async fn create(&self, options: PeerOptions) -> Result<PeerHandle, PeerError> {
        let (events, rx) = mpsc::unbounded_channel();
        let local = options.stream.as_ref().map(RemoteStream::from);

        if options.initiator {
            let _ = events.send(PeerEvent::Signal {
                kind: SignalKind::Offer,
                payload: json!({ "stream": local }),
            });
        }

        let connection = DescriptorConnection {
            remote_id: options.remote_id,
            local: Mutex::new(local),
            events,
            closed: AtomicBool::new(false),
        };
        Ok(PeerHandle {
            connection: Box::new(connection),
            events: rx,
        })
    }
}

struct DescriptorConnection {
    remote_id: String,
    local: Mutex<Option<RemoteStream>>,
    events: mpsc::UnboundedSender<PeerEvent>,
    closed: AtomicBool,
}

impl DescriptorConnection {
    fn emit(&self, event: PeerEvent) -> Result<(), PeerError> {
        self.events.send(event).map_err(|_| PeerError::Closed)
    }

    fn remote_stream(payload: &Value) -> Result<Option<RemoteStream>, PeerError> {
        match payload.get("stream") {
            None | Some(Value::Null) => Ok(None),
            Some(stream) => serde_json::from_value(stream.clone())
                .map(Some)
                .map_err(|e| PeerError::Signal(e.to_string())),
        }
    }
}

#[async_trait]
impl PeerConnection for DescriptorConnection {
    async fn signal(&self, kind: SignalKind, payload: Value) -> Result<(), PeerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }

        match kind {
            SignalKind::Offer => {
                let remote = Self::remote_stream(&payload)?;
                let local = self.local.lock().await.clone();
                self.emit(PeerEvent::Signal {
                    kind: SignalKind::Answer,
                    payload: json!({ "stream": local }),
                })?;
                self.emit(PeerEvent::Signal {
                    kind: SignalKind::IceCandidate,
                    payload: json!({ "candidate": format!("descriptor:{}", self.remote_id) }),
                })?;
                self.emit(PeerEvent::Connected)?;
                if let Some(stream) = remote {
                    self.emit(PeerEvent::Stream(stream))?;
                }
            }
            SignalKind::Answer => {
                let remote = Self::remote_stream(&payload)?;
                self.emit(PeerEvent::Connected)?;
                if let Some(stream) = remote {
                    self.emit(PeerEvent::Stream(stream))?;
                }
            }
            SignalKind::IceCandidate => {
                tracing::debug!("Candidate from '{}': {}", self.remote_id, payload);
            }
            SignalKind::Bye => {
                self.closed.store(true, Ordering::SeqCst);
                self.emit(PeerEvent::Closed)?;
            }
        }
        Ok(())
    }

    async fn replace_track(&self, track: LocalTrack) -> Result<(), PeerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PeerError::Closed);
        }
        let mut local = self.local.lock().await;
        if let Some(stream) = local.as_mut()
            && let Some(sent) = stream.tracks.iter_mut().find(|t| t.kind == track.kind)
        {
            sent.id = track.id;
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaKind, MediaStream};

    fn host_stream() -> MediaStream {
        MediaStream::new(
            "host-stream",
            vec![
                LocalTrack::new("a1", MediaKind::Audio),
                LocalTrack::new("v1", MediaKind::Video),
            ],
        )
    }

    #[tokio::test]
    async fn test_offer_answer_exchange_delivers_host_stream() {
        // テスト項目: offer/answer の交換で両者が接続し、視聴者にホストのストリームが届く
        // given (前提条件):
        let connector = DescriptorConnector;
        let mut viewer = connector
            .create(PeerOptions {
                remote_id: "host".to_string(),
                initiator: true,
                stream: None,
            })
            .await
            .unwrap();
        let mut host = connector
            .create(PeerOptions {
                remote_id: "viewer".to_string(),
                initiator: false,
                stream: Some(host_stream()),
            })
            .await
            .unwrap();

        // when (操作):
        let Some(PeerEvent::Signal { kind, payload }) = viewer.events.recv().await else {
            panic!("expected an offer");
        };
        assert_eq!(kind, SignalKind::Offer);
        host.connection.signal(kind, payload).await.unwrap();
        let Some(PeerEvent::Signal { kind, payload }) = host.events.recv().await else {
            panic!("expected an answer");
        };
        viewer.connection.signal(kind, payload).await.unwrap();

        // then (期待する結果):
        assert_eq!(viewer.events.recv().await, Some(PeerEvent::Connected));
        match viewer.events.recv().await {
            Some(PeerEvent::Stream(stream)) => {
                assert_eq!(stream.id, "host-stream");
                assert_eq!(stream.tracks.len(), 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(
            host.events.recv().await,
            Some(PeerEvent::Signal {
                kind: SignalKind::IceCandidate,
                ..
            })
        ));
        assert_eq!(host.events.recv().await, Some(PeerEvent::Connected));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_signals() {
        // テスト項目: 閉じた接続はシグナルを受け付けない
        let handle = DescriptorConnector
            .create(PeerOptions {
                remote_id: "host".to_string(),
                initiator: false,
                stream: None,
            })
            .await
            .unwrap();
        handle.connection.close().await;
        let result = handle
            .connection
            .signal(SignalKind::Offer, json!({"stream": null}))
            .await;
        assert_eq!(result, Err(PeerError::Closed));
    }

    #[tokio::test]
    async fn test_bye_reports_remote_close() {
        // テスト項目: 相手からの bye で接続が閉じたことが通知される
        // given (前提条件):
        let mut handle = DescriptorConnector
            .create(PeerOptions {
                remote_id: "host".to_string(),
                initiator: false,
                stream: None,
            })
            .await
            .unwrap();

        // when (操作):
        handle
            .connection
            .signal(SignalKind::Bye, Value::Null)
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(handle.events.recv().await, Some(PeerEvent::Closed));
        assert_eq!(
            handle.connection.signal(SignalKind::Answer, json!({})).await,
            Err(PeerError::Closed)
        );
    }
}
