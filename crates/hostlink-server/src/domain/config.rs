//! Server configuration schema.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is read from a TOML file by the infrastructure layer
//! (see `infrastructure::storage`), then adjusted by CLI flags in `main.rs`,
//! then wrapped in an `Arc` and shared with every session task.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 4455
//!
//! [auth]
//! required = true
//! password = "correct horse battery staple"
//!
//! [protocol]
//! default_event_subscriptions = 2047
//! max_worker_threads = 0
//! ```
//!
//! Every field has a serde default, so an empty or partial file is valid.

use std::net::{AddrParseError, SocketAddr};

use hostlink_core::auth;
use hostlink_core::EventSubscription;
use serde::{Deserialize, Serialize};

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: NetworkConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port for WebSocket connections.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Frames that may wait in one session's outbound queue before broadcasts
    /// to that session start being dropped.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Whether clients must answer the Hello challenge.
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub password: String,
    /// Long-lived salt mixed into the stored secret.  Generated on first
    /// save when empty.
    #[serde(default)]
    pub salt: String,
    /// Raise an operator alert on authentication failures and new clients.
    #[serde(default = "default_true")]
    pub alerts_enabled: bool,
}

/// Protocol behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProtocolConfig {
    /// Subscription mask a session starts with before it sends its own.
    #[serde(default = "default_event_subscriptions")]
    pub default_event_subscriptions: u64,
    /// Upper bound on concurrent broadcast and parallel-batch jobs.
    /// `0` uses the number of available CPUs.
    #[serde(default)]
    pub max_worker_threads: usize,
    /// Host frame rate used to schedule `SERIAL_FRAME` batches when the server
    /// runs standalone.
    #[serde(default = "default_frame_rate_hz")]
    pub frame_rate_hz: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4455
}
fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_true() -> bool {
    true
}
fn default_event_subscriptions() -> u64 {
    EventSubscription::ALL
}
fn default_frame_rate_hz() -> u32 {
    60
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: default_true(),
            password: String::new(),
            salt: String::new(),
            alerts_enabled: default_true(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            default_event_subscriptions: default_event_subscriptions(),
            max_worker_threads: 0,
            frame_rate_hz: default_frame_rate_hz(),
        }
    }
}

// ── Derived settings ──────────────────────────────────────────────────────────

impl ServerConfig {
    /// The socket address the listener binds to.
    ///
    /// # Errors
    ///
    /// Returns [`AddrParseError`] if `bind_address` is not an IP address.
    pub fn bind_socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.server.bind_address, self.server.port).parse()
    }

    /// Worker count after resolving `0` to the machine's parallelism.
    pub fn worker_threads(&self) -> usize {
        match self.protocol.max_worker_threads {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
    }

    /// Generates a salt when none is stored.  Returns `true` if one was added,
    /// meaning the caller should persist the config.
    pub fn ensure_salt(&mut self) -> bool {
        if self.auth.salt.is_empty() {
            self.auth.salt = auth::generate_salt();
            true
        } else {
            false
        }
    }

    /// The stored secret clients authenticate against, or `None` when
    /// authentication is disabled.
    pub fn auth_secret(&self) -> Option<String> {
        self.auth
            .required
            .then(|| auth::generate_secret(&self.auth.password, &self.auth.salt))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
