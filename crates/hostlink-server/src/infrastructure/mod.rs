//! Infrastructure layer: sockets, files and the standalone host.

pub mod notifier;
pub mod standalone;
pub mod storage;
pub mod ws_server;

pub use notifier::TracingSecuritySink;
pub use standalone::StandaloneExecutor;
pub use storage::{default_config_path, load_config, save_config, ConfigError};
pub use ws_server::{run_server, serve, ServerContext};
