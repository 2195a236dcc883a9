//! Per-connection session state.
//!
//! A [`Session`] is created when the transport accepts a connection and
//! dropped when the connection closes.  It is shared (`Arc<Session>`) between
//! the connection's reader task, its writer task and the broadcast engine, so
//! every field is either immutable after construction or an atomic.
//!
//! # Locking rules
//!
//! The handshake fields (`identified`, `rpc_version`, `event_subscriptions`,
//! `ignore_invalid_messages`, pending authentication) may only be written while
//! the caller holds the session's operation lock (see
//! [`Session::lock_operations`]).  This keeps two concurrent Identify or
//! Reidentify frames on the same connection from interleaving.  Reads never
//! need the lock.  The message counters are diagnostic and lock-free.
//!
//! The operation lock must not be held across a call into the request
//! executor or while iterating the global session registry.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use uuid::Uuid;

use crate::protocol::codec::WireEncoding;

/// Lookup key for a session in the server's registry.
pub type SessionId = Uuid;

/// Authentication material held until the client proves it knows the secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuth {
    pub challenge: String,
    pub secret: String,
}

/// Session parameters carried by Identify and Reidentify.
///
/// `None` leaves the corresponding field unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionParameters {
    pub ignore_invalid_messages: Option<bool>,
    pub event_subscriptions: Option<u64>,
}

/// State of one client connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    remote_address: String,
    connected_at: SystemTime,
    encoding: WireEncoding,

    identified: AtomicBool,
    rpc_version: AtomicU8,
    event_subscriptions: AtomicU64,
    ignore_invalid_messages: AtomicBool,
    auth: Mutex<Option<PendingAuth>>,

    incoming_messages: AtomicU64,
    outgoing_messages: AtomicU64,

    operation_lock: AsyncMutex<()>,
}

impl Session {
    /// Creates a pre-identified session.
    ///
    /// `default_subscriptions` is the mask used until the client sends its own
    /// `eventSubscriptions`.
    pub fn new(
        remote_address: impl Into<String>,
        encoding: WireEncoding,
        default_subscriptions: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_address: remote_address.into(),
            connected_at: SystemTime::now(),
            encoding,
            identified: AtomicBool::new(false),
            rpc_version: AtomicU8::new(0),
            event_subscriptions: AtomicU64::new(default_subscriptions),
            ignore_invalid_messages: AtomicBool::new(false),
            auth: Mutex::new(None),
            incoming_messages: AtomicU64::new(0),
            outgoing_messages: AtomicU64::new(0),
            operation_lock: AsyncMutex::new(()),
        }
    }

    /// Requires the client to authenticate against `challenge` and `secret`
    /// during Identify.  Only meaningful before the session is shared.
    pub fn with_authentication(self, challenge: impl Into<String>, secret: impl Into<String>) -> Self {
        *self.auth.lock() = Some(PendingAuth {
            challenge: challenge.into(),
            secret: secret.into(),
        });
        self
    }

    // ── Immutable identity ────────────────────────────────────────────────────

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    // ── Handshake state (writes require the operation lock) ───────────────────

    /// Serialises Identify and Reidentify for this session.
    pub async fn lock_operations(&self) -> MutexGuard<'_, ()> {
        self.operation_lock.lock().await
    }

    pub fn is_identified(&self) -> bool {
        self.identified.load(Ordering::Acquire)
    }

    /// Requires the operation lock.
    pub fn set_identified(&self, identified: bool) {
        self.identified.store(identified, Ordering::Release);
    }

    /// Negotiated RPC version; 0 until Identify succeeds.
    pub fn rpc_version(&self) -> u8 {
        self.rpc_version.load(Ordering::Acquire)
    }

    /// Requires the operation lock.  Called once, by the first successful
    /// Identify.
    pub fn set_rpc_version(&self, version: u8) {
        self.rpc_version.store(version, Ordering::Release);
    }

    pub fn event_subscriptions(&self) -> u64 {
        self.event_subscriptions.load(Ordering::Acquire)
    }

    /// Requires the operation lock.
    pub fn set_event_subscriptions(&self, mask: u64) {
        self.event_subscriptions.store(mask, Ordering::Release);
    }

    pub fn ignore_invalid_messages(&self) -> bool {
        self.ignore_invalid_messages.load(Ordering::Acquire)
    }

    /// Requires the operation lock.
    pub fn set_ignore_invalid_messages(&self, ignore: bool) {
        self.ignore_invalid_messages.store(ignore, Ordering::Release);
    }

    /// Applies whichever parameters are present.  Requires the operation lock.
    pub fn apply_parameters(&self, params: SessionParameters) {
        if let Some(ignore) = params.ignore_invalid_messages {
            self.set_ignore_invalid_messages(ignore);
        }
        if let Some(mask) = params.event_subscriptions {
            self.set_event_subscriptions(mask);
        }
    }

    pub fn authentication_required(&self) -> bool {
        self.auth.lock().is_some()
    }

    /// Copy of the pending challenge and secret, if authentication is pending.
    pub fn pending_authentication(&self) -> Option<PendingAuth> {
        self.auth.lock().clone()
    }

    /// Drops the challenge and secret after a successful Identify.  Requires
    /// the operation lock.
    pub fn clear_authentication(&self) {
        self.auth.lock().take();
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    pub fn incoming_message_count(&self) -> u64 {
        self.incoming_messages.load(Ordering::Relaxed)
    }

    pub fn record_incoming(&self) {
        self.incoming_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outgoing_message_count(&self) -> u64 {
        self.outgoing_messages.load(Ordering::Relaxed)
    }

    pub fn record_outgoing(&self) {
        self.outgoing_messages.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::subscriptions::EventSubscription;

    fn session() -> Session {
        Session::new("127.0.0.1:50000", WireEncoding::Json, EventSubscription::ALL)
    }

    #[test]
    fn test_new_session_is_pre_identified() {
        // Arrange / Act
        let s = session();

        // Assert
        assert!(!s.is_identified());
        assert_eq!(s.rpc_version(), 0);
        assert_eq!(s.event_subscriptions(), EventSubscription::ALL);
        assert!(!s.ignore_invalid_messages());
        assert!(!s.authentication_required());
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(session().id(), session().id());
    }

    #[test]
    fn test_with_authentication_sets_pending_material() {
        let s = session().with_authentication("challenge", "secret");
        let pending = s.pending_authentication().unwrap();
        assert_eq!(pending.challenge, "challenge");
        assert_eq!(pending.secret, "secret");
        assert!(s.authentication_required());
    }

    #[test]
    fn test_clear_authentication_removes_material() {
        let s = session().with_authentication("c", "s");
        s.clear_authentication();
        assert!(!s.authentication_required());
        assert!(s.pending_authentication().is_none());
    }

    #[test]
    fn test_apply_parameters_leaves_absent_fields_unchanged() {
        // Arrange
        let s = session();
        s.set_ignore_invalid_messages(true);

        // Act
        s.apply_parameters(SessionParameters {
            ignore_invalid_messages: None,
            event_subscriptions: Some(EventSubscription::INPUTS),
        });

        // Assert
        assert!(s.ignore_invalid_messages());
        assert_eq!(s.event_subscriptions(), EventSubscription::INPUTS);
    }

    #[test]
    fn test_message_counters_increment() {
        let s = session();
        s.record_incoming();
        s.record_outgoing();
        s.record_outgoing();
        assert_eq!(s.incoming_message_count(), 1);
        assert_eq!(s.outgoing_message_count(), 2);
    }

    #[tokio::test]
    async fn test_operation_lock_is_exclusive() {
        // Arrange
        let s = session();
        let guard = s.lock_operations().await;

        // Act
        let second = s.operation_lock.try_lock();

        // Assert
        assert!(second.is_err());
        drop(guard);
        assert!(s.operation_lock.try_lock().is_ok());
    }
}
