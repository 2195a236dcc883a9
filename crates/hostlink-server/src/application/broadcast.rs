//! Event fan-out to subscribed sessions.
//!
//! The host's event source calls [`EventSink::broadcast_event`] from whatever
//! thread observed the change.  That call only queues a job on the worker pool
//! and returns; the job then walks a snapshot of the session registry and
//! queues the event on every eligible session.
//!
//! # Eligibility
//!
//! A session receives an event when all of these hold:
//!
//! 1. it has completed Identify;
//! 2. the event targets no particular RPC version (`0`), or the session's
//!    negotiated version equals the target;
//! 3. its subscription mask shares at least one bit with the event's intent.
//!
//! # Encoding
//!
//! The frame is encoded lazily, at most once per wire encoding per broadcast.
//! Ten JSON sessions share one JSON buffer; a broadcast with only MessagePack
//! recipients never produces JSON at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hostlink_core::protocol::messages::{EventPayload, Frame};
use hostlink_core::{encode_frame, EncodedFrame, EventSubscription, OpCode, WireEncoding};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::application::registry::SessionRegistry;
use crate::application::worker_pool::WorkerPool;

/// Inbound interface for the host's event source.
pub trait EventSink: Send + Sync {
    /// Publishes one event.  `rpc_version == 0` targets every version.
    ///
    /// Must not block the caller.
    fn broadcast_event(&self, intent: u64, event_type: &str, event_data: Option<Value>, rpc_version: u8);
}

/// One event as handed to the engine.  Built per broadcast, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub event_type: String,
    pub intent: u64,
    pub data: Option<Value>,
    pub rpc_version: u8,
}

/// What a single delivery pass did, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub recipients: usize,
    pub failed: usize,
    pub json_encoded: bool,
    pub msgpack_encoded: bool,
}

/// Broadcasts events to every eligible session.
#[derive(Clone)]
pub struct BroadcastEngine {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<SessionRegistry>,
    pool: WorkerPool,
    listening: AtomicBool,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<SessionRegistry>, pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                pool,
                listening: AtomicBool::new(false),
            }),
        }
    }

    /// Set by the transport while its listener is bound.  Broadcasts are
    /// dropped while this is `false`.
    pub fn set_listening(&self, listening: bool) {
        self.inner.listening.store(listening, Ordering::Release);
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::Acquire)
    }

    /// Queues `envelope` for delivery on the worker pool and returns at once.
    pub fn broadcast(&self, envelope: EventEnvelope) {
        if !self.is_listening() {
            return;
        }
        let engine = self.clone();
        self.inner.pool.spawn(async move {
            engine.deliver(&envelope);
        });
    }

    /// Delivers `envelope` synchronously on the calling thread.
    pub fn deliver(&self, envelope: &EventEnvelope) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let frame = Frame::new(
            OpCode::Event,
            EventPayload {
                event_type: envelope.event_type.clone(),
                event_intent: envelope.intent,
                event_data: envelope.data.clone().filter(Value::is_object),
            },
        );

        let mut json: Option<Arc<EncodedFrame>> = None;
        let mut msgpack: Option<Arc<EncodedFrame>> = None;

        for handle in self.inner.registry.snapshot() {
            let session = handle.session();
            if !session.is_identified() {
                continue;
            }
            if envelope.rpc_version != 0 && session.rpc_version() != envelope.rpc_version {
                continue;
            }
            if !EventSubscription(session.event_subscriptions()).wants(envelope.intent) {
                continue;
            }

            let encoding = session.encoding();
            let slot = match encoding {
                WireEncoding::Json => &mut json,
                WireEncoding::MsgPack => &mut msgpack,
            };
            let encoded = match slot.as_ref() {
                Some(encoded) => Arc::clone(encoded),
                None => match encode_frame(&frame, encoding) {
                    Ok(encoded) => {
                        let encoded = Arc::new(encoded);
                        *slot = Some(Arc::clone(&encoded));
                        encoded
                    }
                    Err(e) => {
                        error!("failed to encode event {}: {e}", envelope.event_type);
                        return report;
                    }
                },
            };

            report.recipients += 1;
            if let Err(e) = handle.try_send_encoded(encoded) {
                report.failed += 1;
                warn!(
                    "session {}: failed to queue event {}: {e}",
                    session.remote_address(),
                    envelope.event_type
                );
            }
        }

        report.json_encoded = json.is_some();
        report.msgpack_encoded = msgpack.is_some();

        if EventSubscription::is_high_volume(envelope.intent) {
            trace!(
                "broadcast {} to {} session(s)",
                envelope.event_type,
                report.recipients
            );
        } else {
            debug!(
                "broadcast {} to {} session(s): {}",
                envelope.event_type,
                report.recipients,
                envelope.data.as_ref().map_or(String::new(), |data| data.to_string())
            );
        }
        report
    }
}

impl EventSink for BroadcastEngine {
    fn broadcast_event(&self, intent: u64, event_type: &str, event_data: Option<Value>, rpc_version: u8) {
        self.broadcast(EventEnvelope {
            event_type: event_type.to_string(),
            intent,
            data: event_data,
            rpc_version,
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
