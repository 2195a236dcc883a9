//! WebSocket server: accept loop and per-session tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each connection to WebSocket and negotiating the wire encoding
//!    from the `Sec-WebSocket-Protocol` header.
//! 3. Creating the [`Session`], registering it, and sending Hello.
//! 4. Running a reader loop that decodes frames and feeds them to the
//!    [`ProtocolProcessor`], and a writer task that drains the session's
//!    outbound queue onto the socket.
//! 5. Unregistering the session when either side closes or the task unwinds.
//!
//! # Threading
//!
//! Each session runs in its own Tokio task.  Requests are processed on the
//! session's reader task, one at a time, so a session never has two requests
//! in flight.  Broadcasts reach the session through its outbound queue and
//! never touch the reader.
//!
//! # Shutdown
//!
//! The accept loop polls a shared `AtomicBool` every 200 ms and exits once it
//! is cleared.  Broadcasts stop being queued at the same moment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use hostlink_core::auth::generate_challenge;
use hostlink_core::protocol::messages::{Frame, HelloAuthentication, HelloPayload, CURRENT_RPC_VERSION};
use hostlink_core::{
    decode_frame, EncodedFrame, OpCode, Session, SubscriptionCounter, WireEncoding,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::application::batch::BatchEngine;
use crate::application::broadcast::BroadcastEngine;
use crate::application::executor::RequestExecutor;
use crate::application::frame_clock::FrameWaiter;
use crate::application::processor::{ProcessOutcome, ProtocolProcessor, SecurityEventSink};
use crate::application::registry::{OutboundMessage, SessionHandle, SessionRegistry};
use crate::application::worker_pool::WorkerPool;
use crate::domain::config::ServerConfig;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── Server context ────────────────────────────────────────────────────────────

/// Everything a session task needs, shared behind one `Arc`.
pub struct ServerContext {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    broadcaster: BroadcastEngine,
    processor: ProtocolProcessor,
    auth_secret: Option<String>,
}

impl ServerContext {
    /// Wires the registry, worker pool, broadcast engine, batch engine and
    /// processor together.  Pool jobs run on `runtime`.
    pub fn new(
        config: ServerConfig,
        executor: Arc<dyn RequestExecutor>,
        security: Option<Arc<dyn SecurityEventSink>>,
        frames: FrameWaiter,
        runtime: Handle,
    ) -> Self {
        let subscriptions = Arc::new(SubscriptionCounter::new());
        let registry = Arc::new(SessionRegistry::new(Arc::clone(&subscriptions)));
        let pool = WorkerPool::new(config.worker_threads(), runtime);
        let broadcaster = BroadcastEngine::new(Arc::clone(&registry), pool.clone());
        let batches = BatchEngine::new(Arc::clone(&executor), pool, frames);
        let processor = ProtocolProcessor::new(executor, batches, subscriptions, security);
        let auth_secret = config.auth_secret();

        Self {
            config,
            registry,
            broadcaster,
            processor,
            auth_secret,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The host's entry point for publishing events.
    pub fn broadcaster(&self) -> &BroadcastEngine {
        &self.broadcaster
    }

    pub fn processor(&self) -> &ProtocolProcessor {
        &self.processor
    }

    /// A new, unidentified session.  When authentication is on it carries a
    /// fresh challenge.
    pub fn open_session(&self, remote_address: &str, encoding: WireEncoding) -> Session {
        let session = Session::new(
            remote_address,
            encoding,
            self.config.protocol.default_event_subscriptions,
        );
        match &self.auth_secret {
            Some(secret) => session.with_authentication(generate_challenge(), secret.clone()),
            None => session,
        }
    }

    /// The Hello frame for `session`.
    pub fn hello(&self, session: &Session) -> Frame<HelloPayload> {
        let authentication = session.pending_authentication().map(|pending| HelloAuthentication {
            challenge: pending.challenge,
            salt: self.config.auth.salt.clone(),
        });
        Frame::new(
            OpCode::Hello,
            HelloPayload {
                server_version: env!("CARGO_PKG_VERSION").to_string(),
                rpc_version: CURRENT_RPC_VERSION,
                authentication,
            },
        )
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the configured address and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the bind address is invalid or the listener cannot be
/// bound.
pub async fn run_server(context: Arc<ServerContext>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let addr = context
        .config()
        .bind_socket_addr()
        .with_context(|| format!("invalid bind address {}", context.config().server.bind_address))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;

    info!("HostLink server listening on {addr}");
    serve(context, listener, running).await;
    Ok(())
}

/// Accepts connections on an already bound listener until `running` is
/// cleared.
pub async fn serve(context: Arc<ServerContext>, listener: TcpListener, running: Arc<AtomicBool>) {
    context.broadcaster().set_listening(true);

    while running.load(Ordering::Relaxed) {
        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("TCP connection from {peer_addr}");
                let ctx = Arc::clone(&context);
                tokio::spawn(async move {
                    let remote = peer_addr.to_string();
                    if let Err(e) = run_session(ctx, stream, &remote).await {
                        warn!("session {remote} ended with error: {e:#}");
                    }
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }

    context.broadcaster().set_listening(false);
    info!("shutdown flag set; stopped accepting connections");
}

// ── Per-session handling ──────────────────────────────────────────────────────

async fn run_session(context: Arc<ServerContext>, stream: TcpStream, remote: &str) -> anyhow::Result<()> {
    let mut encoding = WireEncoding::Json;
    let negotiate = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let offered = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok());
        if let Some(chosen) = offered.and_then(WireEncoding::from_subprotocols) {
            encoding = chosen;
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(chosen.subprotocol()));
        }
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, negotiate)
        .await
        .with_context(|| format!("WebSocket handshake failed with {remote}"))?;

    let session = Arc::new(context.open_session(remote, encoding));
    let (outbound_tx, outbound_rx) = mpsc::channel(context.config().server.outbound_queue_capacity.max(1));
    let handle = SessionHandle::new(Arc::clone(&session), outbound_tx);
    let registration = context.registry().register(handle.clone());
    info!(
        "session {remote} connected ({:?}, auth {})",
        encoding,
        if session.authentication_required() { "required" } else { "off" }
    );

    let (ws_tx, ws_rx) = ws_stream.split();
    let writer = tokio::spawn(write_outbound(ws_tx, outbound_rx, remote.to_string()));

    let result = match handle.send(&context.hello(&session)).await {
        Ok(()) => read_inbound(&context, &handle, ws_rx).await,
        Err(e) => Err(anyhow::Error::new(e).context("failed to queue Hello")),
    };

    drop(registration);
    drop(handle);
    let _ = writer.await;

    info!(
        "session {remote} disconnected after {} in / {} out",
        session.incoming_message_count(),
        session.outgoing_message_count()
    );
    result
}

type WsSink = futures_util::stream::SplitSink<WebSocketStream<TcpStream>, WsMessage>;
type WsSource = futures_util::stream::SplitStream<WebSocketStream<TcpStream>>;

async fn read_inbound(context: &ServerContext, handle: &SessionHandle, mut ws_rx: WsSource) -> anyhow::Result<()> {
    let session = handle.session();

    while let Some(message) = ws_rx.next().await {
        let frame = match message {
            Ok(WsMessage::Text(text)) => EncodedFrame::Text(text),
            Ok(WsMessage::Binary(bytes)) => EncodedFrame::Binary(bytes),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("session {}: WebSocket read ended: {e}", session.remote_address());
                break;
            }
        };
        session.record_incoming();

        let incoming = match decode_frame(&frame, session.encoding()) {
            Ok(incoming) => incoming,
            Err(e) if session.ignore_invalid_messages() => {
                debug!("session {}: dropping invalid frame: {e}", session.remote_address());
                continue;
            }
            Err(e) => {
                let _ = handle.close(e.close_code(), e.to_string()).await;
                break;
            }
        };
        debug!(
            "session {}: received op {} ({} bytes)",
            session.remote_address(),
            incoming.op,
            frame.len()
        );

        match context.processor().process(session, incoming.op, incoming.d).await {
            ProcessOutcome::Reply(reply) => {
                handle
                    .send(&reply)
                    .await
                    .with_context(|| format!("failed to queue reply to {}", session.remote_address()))?;
            }
            ProcessOutcome::Close { code, reason } => {
                info!("closing session {} with {code:?}: {reason}", session.remote_address());
                let _ = handle.close(code, reason).await;
                break;
            }
            ProcessOutcome::Ignore => {}
        }
    }
    Ok(())
}

async fn write_outbound(mut ws_tx: WsSink, mut outbound: mpsc::Receiver<OutboundMessage>, remote: String) {
    while let Some(message) = outbound.recv().await {
        let ws_message = match message {
            OutboundMessage::Frame(frame) => match &*frame {
                EncodedFrame::Text(text) => WsMessage::Text(text.clone()),
                EncodedFrame::Binary(bytes) => WsMessage::Binary(bytes.clone()),
            },
            OutboundMessage::Close { code, reason } => {
                let close = CloseFrame {
                    code: WsCloseCode::from(code.code()),
                    reason: reason.into(),
                };
                if let Err(e) = ws_tx.send(WsMessage::Close(Some(close))).await {
                    debug!("session {remote}: close frame not sent: {e}");
                }
                break;
            }
        };
        if let Err(e) = ws_tx.send(ws_message).await {
            warn!("session {remote}: send failed: {e}");
            break;
        }
    }
    let _ = ws_tx.close().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::frame_clock::FrameClock;
    use crate::infrastructure::standalone::StandaloneExecutor;

    fn context(required: bool) -> ServerContext {
        let mut config = ServerConfig::default();
        config.auth.required = required;
        config.auth.password = "pw".to_string();
        config.ensure_salt();
        let clock = FrameClock::new();
        ServerContext::new(
            config,
            Arc::new(StandaloneExecutor::new()),
            None,
            clock.waiter(),
            Handle::current(),
        )
    }

    #[tokio::test]
    async fn test_hello_carries_challenge_when_auth_required() {
        // Arrange
        let ctx = context(true);
        let session = ctx.open_session("127.0.0.1:9", WireEncoding::Json);

        // Act
        let hello = ctx.hello(&session);

        // Assert
        let auth = hello.d.authentication.expect("challenge expected");
        assert_eq!(auth.salt, ctx.config().auth.salt);
        assert_eq!(Some(auth.challenge), session.pending_authentication().map(|p| p.challenge));
        assert_eq!(hello.op, 0);
        assert_eq!(hello.d.rpc_version, 1);
    }

    #[tokio::test]
    async fn test_hello_omits_authentication_when_disabled() {
        let ctx = context(false);
        let session = ctx.open_session("127.0.0.1:9", WireEncoding::MsgPack);
        assert!(ctx.hello(&session).d.authentication.is_none());
        assert!(!session.authentication_required());
    }

    #[tokio::test]
    async fn test_each_session_gets_a_fresh_challenge() {
        let ctx = context(true);
        let a = ctx.open_session("127.0.0.1:1", WireEncoding::Json);
        let b = ctx.open_session("127.0.0.1:2", WireEncoding::Json);
        assert_ne!(
            a.pending_authentication().map(|p| p.challenge),
            b.pending_authentication().map(|p| p.challenge)
        );
    }

    #[tokio::test]
    async fn test_new_session_uses_configured_default_subscriptions() {
        let mut config = ServerConfig::default();
        config.protocol.default_event_subscriptions = 0b11;
        let clock = FrameClock::new();
        let ctx = ServerContext::new(
            config,
            Arc::new(StandaloneExecutor::new()),
            None,
            clock.waiter(),
            Handle::current(),
        );
        assert_eq!(ctx.open_session("x", WireEncoding::Json).event_subscriptions(), 0b11);
    }
}
