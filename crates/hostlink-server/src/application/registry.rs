//! The global table of live sessions.
//!
//! Each entry pairs a [`Session`] with the sending half of that connection's
//! outbound queue.  The transport's writer task owns the receiving half and
//! turns queued messages into WebSocket frames.
//!
//! The table lock is held only to insert, remove, or copy out a snapshot for a
//! broadcast.  Sends happen on the snapshot, after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use hostlink_core::{
    encode_frame, CloseCode, EncodedFrame, ProtocolError, Session, SessionId, SubscriptionCounter,
};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Something for a session's writer task to put on the wire.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// An encoded frame, shared between all recipients of a broadcast.
    Frame(Arc<EncodedFrame>),
    /// Close the connection with this code and reason.
    Close { code: CloseCode, reason: String },
}

/// Why a message could not be queued for a session.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] ProtocolError),
    #[error("outbound queue is full")]
    QueueFull,
    #[error("session writer has shut down")]
    Disconnected,
}

impl<T> From<mpsc::error::TrySendError<T>> for SendError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected,
        }
    }
}

// ── Session handle ────────────────────────────────────────────────────────────

/// A session plus the queue that reaches its connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Session>,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl SessionHandle {
    pub fn new(session: Arc<Session>, outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self { session, outbound }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// Encodes `frame` in the session's encoding and queues it, waiting for
    /// room if the queue is full.  Used for replies so none are dropped.
    ///
    /// # Errors
    ///
    /// [`SendError::Encode`] if encoding fails, [`SendError::Disconnected`] if
    /// the writer has gone away.
    pub async fn send<T: Serialize + ?Sized>(&self, frame: &T) -> Result<(), SendError> {
        let encoded = encode_frame(frame, self.session.encoding())?;
        self.outbound
            .send(OutboundMessage::Frame(Arc::new(encoded)))
            .await
            .map_err(|_| SendError::Disconnected)?;
        self.session.record_outgoing();
        Ok(())
    }

    /// Queues an already encoded frame without waiting.  Used by broadcasts so a
    /// slow client cannot hold up the fan-out.
    ///
    /// # Errors
    ///
    /// [`SendError::QueueFull`] or [`SendError::Disconnected`].
    pub fn try_send_encoded(&self, frame: Arc<EncodedFrame>) -> Result<(), SendError> {
        self.outbound.try_send(OutboundMessage::Frame(frame))?;
        self.session.record_outgoing();
        Ok(())
    }

    /// Asks the writer to close the connection.
    ///
    /// # Errors
    ///
    /// [`SendError::Disconnected`] if the writer has already gone away.
    pub async fn close(&self, code: CloseCode, reason: impl Into<String>) -> Result<(), SendError> {
        self.outbound
            .send(OutboundMessage::Close {
                code,
                reason: reason.into(),
            })
            .await
            .map_err(|_| SendError::Disconnected)
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// All live sessions, keyed by id.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    subscriptions: Arc<SubscriptionCounter>,
}

impl SessionRegistry {
    pub fn new(subscriptions: Arc<SubscriptionCounter>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            subscriptions,
        }
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionCounter> {
        &self.subscriptions
    }

    pub fn insert(&self, handle: SessionHandle) {
        let id = handle.id();
        self.sessions.lock().insert(id, handle);
        debug!("session {id} registered");
    }

    /// Removes a session and releases its subscription refs if it had
    /// identified.
    pub fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.lock().remove(&id)?;
        let session = removed.session();
        if session.is_identified() {
            self.subscriptions.remove_refs(session.event_subscriptions());
        }
        debug!("session {id} unregistered");
        Some(removed)
    }

    /// Inserts `handle` and returns a guard that removes it again when
    /// dropped, including while a panic unwinds the owning task.
    pub fn register(self: &Arc<Self>, handle: SessionHandle) -> Registration {
        let id = handle.id();
        self.insert(handle);
        Registration {
            registry: Arc::clone(self),
            id,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Copy of every entry, taken under the lock and used after it is
    /// released.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscription masks of every identified session.
    pub fn identified_masks(&self) -> Vec<u64> {
        self.sessions
            .lock()
            .values()
            .map(SessionHandle::session)
            .filter(|s| s.is_identified())
            .map(|s| s.event_subscriptions())
            .collect()
    }
}

/// Keeps one session registered for as long as it lives.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl Registration {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use hostlink_core::{EventSubscription, WireEncoding};
    use serde_json::json;

    fn handle(capacity: usize) -> (SessionHandle, mpsc::Receiver<OutboundMessage>) {
        let session = Arc::new(Session::new("127.0.0.1:1", WireEncoding::Json, EventSubscription::ALL));
        let (tx, rx) = mpsc::channel(capacity);
        (SessionHandle::new(session, tx), rx)
    }

    #[test]
    fn test_insert_and_remove() {
        // Arrange
        let registry = SessionRegistry::new(Arc::new(SubscriptionCounter::new()));
        let (h, _rx) = handle(4);
        let id = h.id();

        // Act
        registry.insert(h);

        // Assert
        assert_eq!(registry.len(), 1);
        assert!(registry.get(id).is_some());
        assert!(registry.remove(id).is_some());
        assert!(registry.is_empty());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn test_remove_releases_refs_of_identified_session_only() {
        // Arrange
        let counter = Arc::new(SubscriptionCounter::new());
        let registry = SessionRegistry::new(Arc::clone(&counter));
        let (identified, _rx1) = handle(4);
        let (pending, _rx2) = handle(4);
        identified.session().set_identified(true);
        counter.add_refs(identified.session().event_subscriptions());
        let (a, b) = (identified.id(), pending.id());
        registry.insert(identified);
        registry.insert(pending);

        // Act
        registry.remove(b);
        registry.remove(a);

        // Assert
        assert!(counter.verify_against(registry.identified_masks()).is_ok());
        assert_eq!(counter.count(0), 0);
    }

    #[tokio::test]
    async fn test_registration_is_released_when_session_task_panics() {
        // Arrange
        let counter = Arc::new(SubscriptionCounter::new());
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&counter)));
        let (h, mut rx) = handle(4);
        h.session().set_identified(true);
        counter.add_refs(h.session().event_subscriptions());
        let task_registry = Arc::clone(&registry);

        // Act
        let outcome = tokio::spawn(async move {
            let _registration = task_registry.register(h);
            panic!("session task failure");
        })
        .await;

        // Assert
        assert!(outcome.unwrap_err().is_panic());
        assert!(registry.is_empty());
        assert_eq!(counter.count(0), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_encodes_in_session_encoding_and_counts() {
        // Arrange
        let (h, mut rx) = handle(4);

        // Act
        h.send(&json!({"op": 2, "d": {"negotiatedRpcVersion": 1}})).await.unwrap();

        // Assert
        match rx.recv().await.unwrap() {
            OutboundMessage::Frame(frame) => assert!(matches!(*frame, EncodedFrame::Text(_))),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.session().outgoing_message_count(), 1);
    }

    #[test]
    fn test_try_send_reports_full_queue() {
        // Arrange
        let (h, _rx) = handle(1);
        let frame = Arc::new(EncodedFrame::Text("{}".to_string()));
        h.try_send_encoded(Arc::clone(&frame)).unwrap();

        // Act
        let err = h.try_send_encoded(frame).unwrap_err();

        // Assert
        assert!(matches!(err, SendError::QueueFull));
        assert_eq!(h.session().outgoing_message_count(), 1);
    }

    #[test]
    fn test_try_send_reports_disconnected_writer() {
        let (h, rx) = handle(1);
        drop(rx);
        let err = h.try_send_encoded(Arc::new(EncodedFrame::Text("{}".into()))).unwrap_err();
        assert!(matches!(err, SendError::Disconnected));
    }
}
