//! HostLink server: entry point.
//!
//! Runs the WebSocket control-plane server standalone, with the built-in
//! executor that answers `GetVersion`, and a frame clock driven at the
//! configured frame rate.
//!
//! # Usage
//!
//! ```text
//! hostlink-server [OPTIONS]
//!
//! Options:
//!   --config     <PATH>   Config file [default: platform config dir]
//!   --bind       <ADDR>   Bind address
//!   --port       <PORT>   Listener port
//!   --password   <PASS>   Authentication password
//!   --no-auth             Disable authentication
//!   --workers    <N>      Worker pool size (0 = CPU count)
//!   --frame-rate <HZ>     Frame clock rate
//! ```
//!
//! Every option can also be set through a `HOSTLINK_*` environment variable.
//! Options override the config file; CLI args take precedence over
//! environment variables.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use hostlink_core::EventSubscription;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hostlink_server::application::{EventSink, FrameClock, SecurityEventSink};
use hostlink_server::domain::ServerConfig;
use hostlink_server::infrastructure::{
    default_config_path, load_config, run_server, save_config, ServerContext, StandaloneExecutor,
    TracingSecuritySink,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// HostLink WebSocket control-plane server.
#[derive(Debug, Parser)]
#[command(name = "hostlink-server", about = "WebSocket control-plane server", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "HOSTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    #[arg(long, env = "HOSTLINK_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.
    #[arg(long, env = "HOSTLINK_PORT")]
    port: Option<u16>,

    /// Password clients must authenticate with.
    #[arg(long, env = "HOSTLINK_PASSWORD")]
    password: Option<String>,

    /// Accept clients without authentication.
    #[arg(long, env = "HOSTLINK_NO_AUTH")]
    no_auth: bool,

    /// Upper bound on concurrent broadcast and parallel-batch jobs.
    #[arg(long, env = "HOSTLINK_WORKERS")]
    workers: Option<usize>,

    /// Frame clock rate in Hz for `SERIAL_FRAME` batches.
    #[arg(long, env = "HOSTLINK_FRAME_RATE")]
    frame_rate: Option<u32>,
}

impl Cli {
    /// Overlays the flags that were given onto `config`.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(password) = &self.password {
            config.auth.password = password.clone();
        }
        if self.no_auth {
            config.auth.required = false;
        }
        if let Some(workers) = self.workers {
            config.protocol.max_worker_threads = workers;
        }
        if let Some(rate) = self.frame_rate {
            config.protocol.frame_rate_hz = rate;
        }
    }
}

fn frame_interval(frame_rate_hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(frame_rate_hz.max(1)))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path().context("no --config given and no platform config directory")?,
    };
    let mut config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    // The salt must survive restarts or every stored secret changes.
    if config.ensure_salt() {
        match save_config(&config_path, &config) {
            Ok(()) => info!("generated authentication salt in {}", config_path.display()),
            Err(e) => warn!("could not persist generated salt: {e}"),
        }
    }
    cli.apply(&mut config);

    if config.auth.required && config.auth.password.is_empty() {
        warn!("authentication is required but the password is empty");
    }
    info!(
        "HostLink server starting: bind={}:{}, auth={}, workers={}",
        config.server.bind_address,
        config.server.port,
        config.auth.required,
        config.worker_threads()
    );

    // ── Wiring ────────────────────────────────────────────────────────────────
    let clock = FrameClock::new();
    let frame_period = frame_interval(config.protocol.frame_rate_hz);
    let security: Arc<dyn SecurityEventSink> = Arc::new(TracingSecuritySink::new(config.auth.alerts_enabled));
    let context = Arc::new(ServerContext::new(
        config,
        Arc::new(StandaloneExecutor::new()),
        Some(security),
        clock.waiter(),
        Handle::current(),
    ));

    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(frame_period);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            clock.tick();
        }
    });

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    let broadcaster = context.broadcaster().clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                broadcaster.broadcast_event(EventSubscription::GENERAL, "ExitStarted", None, 0);
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_server(context, running).await?;

    info!("HostLink server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_without_flags_leaves_config_untouched() {
        // Arrange
        let cli = Cli::parse_from(["hostlink-server"]);
        let mut config = ServerConfig::default();

        // Act
        cli.apply(&mut config);

        // Assert
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_cli_flags_override_config() {
        // Arrange
        let cli = Cli::parse_from([
            "hostlink-server",
            "--bind",
            "127.0.0.1",
            "--port",
            "4460",
            "--password",
            "secret",
            "--no-auth",
            "--workers",
            "3",
            "--frame-rate",
            "30",
        ]);
        let mut config = ServerConfig::default();

        // Act
        cli.apply(&mut config);

        // Assert
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.port, 4460);
        assert_eq!(config.auth.password, "secret");
        assert!(!config.auth.required);
        assert_eq!(config.protocol.max_worker_threads, 3);
        assert_eq!(config.protocol.frame_rate_hz, 30);
    }

    #[test]
    fn test_cli_config_path() {
        let cli = Cli::parse_from(["hostlink-server", "--config", "/tmp/hostlink.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/hostlink.toml")));
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(frame_interval(50), Duration::from_millis(20));
        assert_eq!(frame_interval(0), Duration::from_secs(1));
    }
}
