//! Domain layer for hostlink-server.
//!
//! Pure configuration types with no I/O.  Session state itself lives in
//! `hostlink-core` because client tooling shares it.

pub mod config;

pub use config::{AuthConfig, NetworkConfig, ProtocolConfig, ServerConfig};
