//! Subscribe sessions: one dedicated broker connection per streaming request.
//!
//! A session moves `Idle -> Connecting -> Subscribed -> Closed`. The broker's
//! connect acknowledgment triggers the subscribe, matching messages are pushed
//! onto the response stream, and either disconnect signal (the client going
//! away, or the request being ended by the server) closes the connection.
//! Closing is idempotent; the connection is closed exactly once.

use crate::broker::{BrokerConnection, ConnectionHandle};
use crate::models::ConnectionEvent;
use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Subscribed,
    Closed,
}

/// The two HTTP-side signals that end a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectSignal {
    /// The client aborted or the connection dropped.
    Close,
    /// The request was ended from the server side.
    End,
}

impl fmt::Display for DisconnectSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Close => f.write_str("close"),
            Self::End => f.write_str("end"),
        }
    }
}

pub struct SubscriptionSession {
    topic: String,
    state: SessionState,
    connection: Box<dyn ConnectionHandle>,
    closed: AtomicBool,
}

impl SubscriptionSession {
    pub fn new(topic: impl Into<String>, connection: Box<dyn ConnectionHandle>) -> Self {
        Self {
            topic: topic.into(),
            state: SessionState::Idle,
            connection,
            closed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> SessionState {
        if self.is_closed() {
            SessionState::Closed
        } else {
            self.state
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The dedicated connection has been requested from the broker.
    pub fn mark_connecting(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Connecting;
        }
    }

    /// Applies one broker event. Returns the payload to write when the event
    /// is a message for exactly this session's topic.
    pub fn on_event(&mut self, event: ConnectionEvent) -> Option<Bytes> {
        if self.is_closed() {
            return None;
        }

        match event {
            ConnectionEvent::Connected => {
                // Every (re)connect needs a fresh subscribe with a clean session.
                self.connection.subscribe(&self.topic);
                self.state = SessionState::Subscribed;
                debug!("Subscribed session to '{}'", self.topic);
                None
            }
            ConnectionEvent::Message(message) if message.topic == self.topic => {
                Some(message.payload)
            }
            ConnectionEvent::Message(message) => {
                debug!(
                    "Ignoring message on '{}' for session on '{}'",
                    message.topic, self.topic
                );
                None
            }
        }
    }

    /// Closes the dedicated connection. Returns false if it was already closed.
    pub fn close(&self, signal: DisconnectSignal) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.connection.close();
        info!(
            "Subscription to '{}' closed on {} signal.",
            self.topic, signal
        );
        true
    }
}

impl Drop for SubscriptionSession {
    fn drop(&mut self) {
        self.close(DisconnectSignal::Close);
    }
}

impl fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("topic", &self.topic)
            .field("state", &self.state())
            .finish()
    }
}

struct StreamState {
    session: SubscriptionSession,
    events: mpsc::Receiver<ConnectionEvent>,
    shutdown: BoxFuture<'static, ()>,
}

/// Starts a session on `connection` and returns the push stream of matching
/// payloads.
///
/// Dropping the stream (the client went away) closes the connection. A
/// shutdown signal ends the stream after closing the connection. The stream
/// never ends on its own otherwise, even if the broker feed goes silent.
pub fn session_stream(
    topic: impl Into<String>,
    connection: BrokerConnection,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let mut session = SubscriptionSession::new(topic, connection.handle);
    session.mark_connecting();

    let state = StreamState {
        session,
        events: connection.events,
        shutdown: wait_for_shutdown(shutdown).boxed(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            tokio::select! {
                event = state.events.recv() => match event {
                    Some(event) => {
                        if let Some(payload) = state.session.on_event(event) {
                            return Some((Ok::<_, Infallible>(payload), state));
                        }
                    }
                    None => {
                        debug!("Broker feed for '{}' ended.", state.session.topic());
                        // Hold the response open until the client leaves.
                        state.shutdown.as_mut().await;
                        state.session.close(DisconnectSignal::End);
                        return None;
                    }
                },
                () = state.shutdown.as_mut() => {
                    state.session.close(DisconnectSignal::End);
                    return None;
                }
            }
        }
    })
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // No sender left, so no shutdown can arrive.
            future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncomingMessage;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        subscribed: Mutex<Vec<String>>,
        closed: AtomicUsize,
    }

    struct FakeHandle(Arc<Calls>);

    impl ConnectionHandle for FakeHandle {
        fn subscribe(&self, topic: &str) {
            self.0.subscribed.lock().unwrap().push(topic.to_string());
        }

        fn close(&self) {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn message(topic: &str, payload: &'static str) -> ConnectionEvent {
        ConnectionEvent::Message(IncomingMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
        })
    }

    #[test]
    fn session_walks_through_states() {
        let calls = Arc::new(Calls::default());
        let mut session = SubscriptionSession::new("x", Box::new(FakeHandle(calls.clone())));
        assert_eq!(session.state(), SessionState::Idle);

        session.mark_connecting();
        assert_eq!(session.state(), SessionState::Connecting);

        assert_eq!(session.on_event(ConnectionEvent::Connected), None);
        assert_eq!(session.state(), SessionState::Subscribed);
        assert_eq!(*calls.subscribed.lock().unwrap(), vec!["x".to_string()]);

        assert!(session.close(DisconnectSignal::Close));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn only_exact_topic_matches_are_forwarded() {
        let calls = Arc::new(Calls::default());
        let mut session = SubscriptionSession::new("a/b", Box::new(FakeHandle(calls)));
        session.on_event(ConnectionEvent::Connected);

        assert_eq!(session.on_event(message("a/b/c", "nested")), None);
        assert_eq!(session.on_event(message("a/+", "wild")), None);
        assert_eq!(
            session.on_event(message("a/b", "hit")),
            Some(Bytes::from_static(b"hit"))
        );
    }

    #[test]
    fn resubscribes_after_reconnect() {
        let calls = Arc::new(Calls::default());
        let mut session = SubscriptionSession::new("x", Box::new(FakeHandle(calls.clone())));
        session.on_event(ConnectionEvent::Connected);
        session.on_event(ConnectionEvent::Connected);
        assert_eq!(calls.subscribed.lock().unwrap().len(), 2);
    }

    #[test]
    fn close_is_idempotent_across_signals() {
        let calls = Arc::new(Calls::default());
        let session = SubscriptionSession::new("x", Box::new(FakeHandle(calls.clone())));

        assert!(session.close(DisconnectSignal::End));
        assert!(!session.close(DisconnectSignal::Close));
        drop(session);

        assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_session_ignores_events() {
        let calls = Arc::new(Calls::default());
        let mut session = SubscriptionSession::new("x", Box::new(FakeHandle(calls.clone())));
        session.close(DisconnectSignal::Close);

        assert_eq!(session.on_event(ConnectionEvent::Connected), None);
        assert_eq!(session.on_event(message("x", "late")), None);
        assert!(calls.subscribed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_forwards_and_closes_on_drop() {
        let calls = Arc::new(Calls::default());
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = BrokerConnection::new(rx, Box::new(FakeHandle(calls.clone())));

        let mut stream = Box::pin(session_stream("x", connection, shutdown_rx));

        tx.send(ConnectionEvent::Connected).await.unwrap();
        tx.send(message("y", "other")).await.unwrap();
        tx.send(message("x", "first")).await.unwrap();

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk, Bytes::from_static(b"first"));
        assert_eq!(*calls.subscribed.lock().unwrap(), vec!["x".to_string()]);
        assert_eq!(calls.closed.load(Ordering::SeqCst), 0);

        drop(stream);
        assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_ends_the_stream_once() {
        let calls = Arc::new(Calls::default());
        let (_tx, rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = BrokerConnection::new(rx, Box::new(FakeHandle(calls.clone())));

        let mut stream = Box::pin(session_stream("x", connection, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        assert!(stream.next().await.is_none());
        drop(stream);
        assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
    }
}
