//! Integration tests for the per-connection session loop
//!
//! Sessions are driven with in-memory frame streams instead of real sockets.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use nexus_learn_backend::connection_manager::{ConnectionHandle, ConnectionManager};
use nexus_learn_backend::websocket::{CloseReason, OutboundMessage, Session, SessionState};

const IDLE: Duration = Duration::from_secs(5);

struct Harness {
    registry: Arc<ConnectionManager>,
    handle: Arc<ConnectionHandle>,
    outbound: mpsc::Receiver<OutboundMessage>,
    shutdown_tx: broadcast::Sender<()>,
    session: Session,
}

fn harness(user_id: Option<i64>, idle_timeout: Duration) -> Harness {
    let registry = Arc::new(ConnectionManager::new());
    let (tx, outbound) = mpsc::channel(16);
    let handle = Arc::new(ConnectionHandle::new(
        "tab-1",
        user_id,
        tx,
        Duration::from_millis(100),
    ));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let session = Session::start(registry.clone(), handle.clone(), idle_timeout, shutdown_rx)
        .expect("registration should succeed");

    Harness {
        registry,
        handle,
        outbound,
        shutdown_tx,
        session,
    }
}

fn frames(
    items: Vec<Message>,
) -> impl futures::Stream<Item = Result<Message, std::io::Error>> + Unpin {
    stream::iter(items.into_iter().map(Ok))
}

fn text(json: &str) -> Message {
    Message::Text(json.into())
}

fn next_json(rx: &mut mpsc::Receiver<OutboundMessage>) -> Value {
    let msg = rx.try_recv().expect("expected a queued reply");
    serde_json::from_str(&msg.to_json().unwrap()).unwrap()
}

// =============================================================================
// Request / reply
// =============================================================================

mod reply_tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_preserve_request_order() {
        let Harness {
            registry,
            handle,
            mut outbound,
            session,
            ..
        } = harness(Some(1), IDLE);

        assert_eq!(session.state(), SessionState::Open);
        assert!(registry.contains(&handle));

        let reason = session
            .run(frames(vec![
                text(r#"{"type":"ping"}"#),
                text(r#"{"type":"chat","text":"hi"}"#),
                text(r#"{"type":"ping"}"#),
            ]))
            .await;

        assert_eq!(reason, CloseReason::StreamEnded);

        let first = next_json(&mut outbound);
        assert_eq!(first["type"], "pong");
        assert!(first["timestamp"].as_str().unwrap().ends_with('Z'));

        let second = next_json(&mut outbound);
        assert_eq!(second["type"], "echo");
        assert_eq!(second["data"]["type"], "chat");
        assert_eq!(second["data"]["text"], "hi");

        assert_eq!(next_json(&mut outbound)["type"], "pong");
        assert!(outbound.try_recv().is_err());

        // Session end always unregisters
        assert!(!registry.contains(&handle));
        assert!(registry.user_connection(1).is_none());
    }

    #[tokio::test]
    async fn test_message_without_type_is_echoed() {
        let Harness {
            mut outbound,
            session,
            ..
        } = harness(None, IDLE);

        session.run(frames(vec![text(r#"{"hello":"world"}"#)])).await;

        let reply = next_json(&mut outbound);
        assert_eq!(reply["type"], "echo");
        assert_eq!(reply["data"], serde_json::json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn test_invalid_json_gets_error_and_connection_stays_open() {
        let Harness {
            mut outbound,
            session,
            ..
        } = harness(None, IDLE);

        let reason = session
            .run(frames(vec![
                text("not json"),
                text("[1, 2, 3]"),
                text(r#"{"type":"ping"}"#),
            ]))
            .await;

        assert_eq!(reason, CloseReason::StreamEnded);

        for _ in 0..2 {
            let error = next_json(&mut outbound);
            assert_eq!(error["type"], "error");
            assert_eq!(error["code"], "INVALID_MESSAGE");
        }
        assert_eq!(next_json(&mut outbound)["type"], "pong");
    }

    #[tokio::test]
    async fn test_binary_frame_is_rejected_with_error() {
        let Harness {
            mut outbound,
            session,
            ..
        } = harness(None, IDLE);

        session
            .run(frames(vec![Message::Binary(vec![1u8, 2, 3].into())]))
            .await;

        let reply = next_json(&mut outbound);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "UNSUPPORTED_FORMAT");
    }
}

// =============================================================================
// Termination
// =============================================================================

mod termination_tests {
    use super::*;

    #[tokio::test]
    async fn test_close_frame_ends_session() {
        let Harness {
            registry,
            handle,
            mut outbound,
            session,
            ..
        } = harness(Some(3), IDLE);

        let reason = session
            .run(frames(vec![Message::Close(None), text(r#"{"type":"ping"}"#)]))
            .await;

        assert_eq!(reason, CloseReason::ClientClosed);
        assert!(outbound.try_recv().is_err());
        assert!(!registry.contains(&handle));
    }

    #[tokio::test]
    async fn test_reply_failure_ends_session() {
        let Harness {
            registry,
            handle,
            outbound,
            session,
            ..
        } = harness(Some(4), IDLE);
        drop(outbound);

        let reason = session.run(frames(vec![text(r#"{"type":"ping"}"#)])).await;

        assert_eq!(reason, CloseReason::ReplyFailed);
        assert!(!registry.contains(&handle));
    }

    #[tokio::test]
    async fn test_transport_error_ends_session() {
        let Harness {
            registry,
            handle,
            session,
            ..
        } = harness(None, IDLE);

        let inbound = stream::iter(vec![Err::<Message, _>(std::io::Error::other("reset"))]);
        let reason = session.run(inbound).await;

        assert_eq!(reason, CloseReason::TransportError);
        assert!(!registry.contains(&handle));
    }

    #[tokio::test]
    async fn test_idle_connection_times_out() {
        let Harness {
            registry,
            handle,
            session,
            ..
        } = harness(None, Duration::from_millis(50));

        let inbound = stream::pending::<Result<Message, std::io::Error>>();
        let reason = tokio::time::timeout(Duration::from_secs(2), session.run(inbound))
            .await
            .expect("session should end on its own");

        assert_eq!(reason, CloseReason::IdleTimeout);
        assert!(!registry.contains(&handle));
    }

    #[tokio::test]
    async fn test_shutdown_signal_ends_session() {
        let Harness {
            registry,
            handle,
            shutdown_tx,
            session,
            ..
        } = harness(Some(8), IDLE);

        let inbound = stream::pending::<Result<Message, std::io::Error>>();
        let run = tokio::spawn(session.run(inbound));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("session should stop")
            .unwrap();

        assert_eq!(reason, CloseReason::Shutdown);
        assert!(!registry.contains(&handle));
        assert!(registry.user_connection(8).is_none());
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_does_not_end_session() {
        let Harness {
            shutdown_tx,
            session,
            outbound: _outbound,
            ..
        } = harness(None, IDLE);
        drop(shutdown_tx);

        let inbound = stream::iter(vec![Ok::<_, std::io::Error>(text(r#"{"type":"ping"}"#))])
            .chain(stream::pending());
        let result = tokio::time::timeout(Duration::from_millis(100), session.run(inbound)).await;

        assert!(result.is_err(), "session should keep waiting for frames");
    }
}
