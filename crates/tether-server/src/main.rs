//! tether-server entry point.
//!
//! Accepts WebSocket clients, tracks them by the id they present in the
//! `Client-Id` handshake header, and periodically greets every client both
//! individually and through a broadcast.
//!
//! # Usage
//!
//! ```text
//! tether-server [OPTIONS]
//!
//! Options:
//!   --bind              <ADDR>   Listener address [default: 127.0.0.1:8080]
//!   --path              <PATH>   Upgrade path [default: /ws]
//!   --allowed-origin    <ORIGIN> Browser origin allowed to connect; repeatable [default: *]
//!   --require-client-id          Reject upgrades without a Client-Id header
//!   --announce-interval <SECS>   Seconds between greetings; 0 disables them [default: 2]
//!   --config            <FILE>   TOML file; command-line values override it
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                   | Flag                  |
//! |----------------------------|-----------------------|
//! | `TETHER_BIND`              | `--bind`              |
//! | `TETHER_PATH`              | `--path`              |
//! | `TETHER_ALLOWED_ORIGINS`   | `--allowed-origin` (comma separated) |
//! | `TETHER_REQUIRE_CLIENT_ID` | `--require-client-id` |
//! | `TETHER_ANNOUNCE_INTERVAL` | `--announce-interval` |
//! | `TETHER_SERVER_CONFIG`     | `--config`            |
//!
//! Ctrl+C closes every client with a normal close frame and exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tether_server::infrastructure::load_config;
use tether_server::{ServerConfig, ServerError, ServerHandler, WsServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket server with client identity, addressed send and broadcast.
///
/// Options left unset fall back to the `--config` file, then to built-in
/// defaults.
#[derive(Debug, Parser)]
#[command(
    name = "tether-server",
    about = "WebSocket server that tracks clients by identity",
    version
)]
struct Cli {
    /// Address the listener binds to [default: 127.0.0.1:8080].
    ///
    /// Use `0.0.0.0:<port>` to accept connections from other machines.
    #[arg(long, env = "TETHER_BIND")]
    bind: Option<SocketAddr>,

    /// Upgrade path; other paths are answered with 404 [default: /ws].
    #[arg(long, env = "TETHER_PATH")]
    path: Option<String>,

    /// Browser origin allowed to connect.  May be given more than once.
    /// `*` allows every origin [default: *].
    #[arg(
        long = "allowed-origin",
        env = "TETHER_ALLOWED_ORIGINS",
        value_delimiter = ','
    )]
    allowed_origins: Vec<String>,

    /// Reject upgrades that carry no client id instead of assigning one.
    #[arg(long, env = "TETHER_REQUIRE_CLIENT_ID")]
    require_client_id: bool,

    /// Seconds between greeting rounds.  `0` turns the greetings off.
    #[arg(long, default_value_t = 2, env = "TETHER_ANNOUNCE_INTERVAL")]
    announce_interval: u64,

    /// Optional TOML configuration file.
    #[arg(long, env = "TETHER_SERVER_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Merges config file, command line and defaults into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or holds an
    /// invalid value, or if `--path` does not start with `/`.
    fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .and_then(|file| file.into_server_config())
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(path) = &self.path {
            anyhow::ensure!(path.starts_with('/'), "--path must start with '/': {path:?}");
            config.path = path.clone();
        }
        if !self.allowed_origins.is_empty() {
            config.allowed_origins = self.allowed_origins.clone();
        }
        if self.require_client_id {
            config.assign_missing_ids = false;
        }
        Ok(config)
    }

    /// `None` when greetings are turned off.
    fn announce_period(&self) -> Option<Duration> {
        (self.announce_interval > 0).then(|| Duration::from_secs(self.announce_interval))
    }
}

// ── Server event logging ──────────────────────────────────────────────────────

/// Logs every server event.
struct LoggingHandler;

impl ServerHandler for LoggingHandler {
    fn on_start(&self) {
        info!("server started");
    }

    fn on_stop(&self) {
        info!("server stopped");
    }

    fn on_connect(&self, client_id: &str) {
        info!(client_id, "client connected");
    }

    fn on_disconnect(&self, client_id: &str, error: &ServerError) {
        warn!(client_id, "client disconnected: {error}");
    }

    fn on_message(&self, client_id: &str, message: &[u8]) {
        info!(
            client_id,
            "received message: {}",
            String::from_utf8_lossy(message)
        );
    }

    fn on_error(&self, error: &ServerError) {
        error!("server error: {error}");
    }
}

// ── Greetings ─────────────────────────────────────────────────────────────────

/// Every `period`, greets each connected client by id and then broadcasts a
/// greeting to all of them.  Runs until aborted.
async fn announce(server: WsServer, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        for client_id in server.client_ids() {
            let greeting = format!("Hello Client {client_id}");
            if let Err(e) = server.send(&client_id, &greeting).await {
                // The client may have left between listing and sending.
                debug!(client_id, "greeting not delivered: {e}");
            }
        }

        match server.broadcast(&"Hello All Clients!").await {
            Ok(delivered) => debug!(delivered, "broadcast greeting"),
            Err(e) => warn!("broadcast failed: {e}"),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.to_server_config()?;
    let announce_period = cli.announce_period();

    let server = WsServer::new(config, Arc::new(LoggingHandler));
    let listener = server.bind().await.context("failed to start server")?;

    let serve_task = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(listener).await })
    };
    let announcer = announce_period.map(|period| tokio::spawn(announce(server.clone(), period)));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("received Ctrl+C, shutting down");

    if let Some(announcer) = announcer {
        announcer.abort();
    }
    server.shutdown().await;
    serve_task.await.context("accept loop panicked")?;

    info!("tether server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
