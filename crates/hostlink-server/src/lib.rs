//! hostlink-server library crate.
//!
//! A WebSocket control-plane server that exposes a live host application's
//! state and commands to remote clients.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Remote clients (JSON or MessagePack over WebSocket)
//!         ↕
//! [hostlink-server]
//!   ├── domain/           ServerConfig
//!   ├── application/      Protocol processor, batch engine, broadcast engine,
//!   │                     session registry, worker pool, frame clock
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop and per-session reader/writer tasks
//!         ├── storage/    TOML config file
//!         ├── notifier/   Security alerts through tracing
//!         └── standalone/ Executor used when no host is attached
//!         ↕
//! Host application (RequestExecutor, EventSink, FrameClock)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `hostlink-core`, and on Tokio only
//!   for channels, semaphores and task spawning.  It never opens a socket.
//! - `infrastructure` depends on everything else plus `tokio-tungstenite`.
//!
//! # Embedding (for beginners)
//!
//! A host application plugs in at three points:
//!
//! 1. It implements [`application::RequestExecutor`] to run named requests.
//! 2. It calls [`application::EventSink::broadcast_event`] on
//!    [`infrastructure::ServerContext::broadcaster`] whenever its state
//!    changes.
//! 3. It calls [`application::FrameClock::tick`] once per rendered frame so
//!    `SERIAL_FRAME` batches line up with its frame loop.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: protocol processing and event delivery.
pub mod application;

/// Infrastructure layer: WebSocket server, config storage and alerts.
pub mod infrastructure;
