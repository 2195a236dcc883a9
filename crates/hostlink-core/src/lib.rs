//! # hostlink-core
//!
//! Shared library for HostLink containing the wire protocol, the per-connection
//! session state, the subscription ref-count service and the authentication
//! challenge/response helpers.
//!
//! This crate is used by the server crate and by any client tooling that needs
//! to speak the protocol.  It has no dependencies on sockets or on a running
//! async executor.
//!
//! # Architecture overview (for beginners)
//!
//! HostLink exposes a live host application's state and commands to remote
//! clients over a persistent WebSocket connection.  Clients identify
//! themselves, subscribe to categories of events ("intents"), and send
//! requests (alone or in batches) that the host executes.
//!
//! This crate (`hostlink-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How frames travel over the network.  Every frame is a
//!   `{op, d}` document encoded as JSON (text frames) or MessagePack (binary
//!   frames), identified by a small numeric opcode.
//!
//! - **`domain`** – Pure state with no I/O: the [`Session`] held for each
//!   connection, the [`Request`]/[`RequestResult`] values exchanged with the
//!   host's command executor, and the [`SubscriptionCounter`] that tracks how
//!   many identified sessions want each event intent.
//!
//! - **`auth`** – The salted SHA-256 challenge/response used during the
//!   Identify handshake.

pub mod auth;
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `hostlink_core::Session` instead of `hostlink_core::domain::session::Session`.
pub use domain::request::{BatchExecutionType, Request, RequestResult, RequestStatus};
pub use domain::session::{Session, SessionId};
pub use domain::subscriptions::{EventSubscription, SubscriptionCounter};
pub use protocol::codec::{decode_frame, encode_frame, EncodedFrame, ProtocolError, WireEncoding};
pub use protocol::opcodes::{CloseCode, OpCode};
