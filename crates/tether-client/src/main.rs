//! tether-client entry point.
//!
//! Connects to a tether server, keeps the connection alive, logs every
//! session event, and greets the server once after a short delay.
//!
//! # Usage
//!
//! ```text
//! tether-client --client-id <ID> [OPTIONS]
//!
//! Options:
//!   --client-id       <ID>    Identity sent in the Client-Id header
//!   --scheme          <ws|wss> [default: ws]
//!   --host            <HOST>  [default: localhost]
//!   --port            <PORT>  [default: 8080]
//!   --path            <PATH>  [default: /ws]
//!   --retry-interval  <SECS>  Linear backoff unit [default: 5]
//!   --max-retries     <N>     Consecutive failed dials before giving up [default: 10]
//!   --config          <FILE>  TOML file; command-line values override it
//!   --greeting-delay  <SECS>  Delay before the greeting is sent [default: 5]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                 | Flag               |
//! |--------------------------|--------------------|
//! | `TETHER_CLIENT_ID`       | `--client-id`      |
//! | `TETHER_SCHEME`          | `--scheme`         |
//! | `TETHER_HOST`            | `--host`           |
//! | `TETHER_PORT`            | `--port`           |
//! | `TETHER_PATH`            | `--path`           |
//! | `TETHER_RETRY_INTERVAL`  | `--retry-interval` |
//! | `TETHER_MAX_RETRIES`     | `--max-retries`    |
//! | `TETHER_CLIENT_CONFIG`   | `--config`         |
//! | `TETHER_GREETING_DELAY`  | `--greeting-delay` |
//!
//! The process exits on Ctrl+C, or by itself once the session gives up
//! after `--max-retries` failed dials.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tether_client::infrastructure::load_config;
use tether_client::{
    ClientSession, EndpointConfig, RetryPolicy, SessionError, SessionHandler, SessionState,
    TungsteniteConnector,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Reconnecting WebSocket client.
///
/// Options left unset fall back to the `--config` file, then to built-in
/// defaults.
#[derive(Debug, Parser)]
#[command(
    name = "tether-client",
    about = "Reconnecting WebSocket client with keepalive and bounded backoff",
    version
)]
struct Cli {
    /// Identity sent in the `Client-Id` handshake header (required unless the
    /// config file sets `endpoint.client_id`).
    #[arg(long, env = "TETHER_CLIENT_ID")]
    client_id: Option<String>,

    /// `ws` or `wss` [default: ws].
    #[arg(long, env = "TETHER_SCHEME")]
    scheme: Option<String>,

    /// Server host name or IP address [default: localhost].
    #[arg(long, env = "TETHER_HOST")]
    host: Option<String>,

    /// Server port [default: 8080].
    #[arg(long, env = "TETHER_PORT")]
    port: Option<u16>,

    /// Upgrade path [default: /ws].
    #[arg(long, env = "TETHER_PATH")]
    path: Option<String>,

    /// Linear backoff unit in seconds: the k-th retry waits k times this
    /// [default: 5].
    #[arg(long, env = "TETHER_RETRY_INTERVAL")]
    retry_interval: Option<u64>,

    /// Consecutive failed dials tolerated before the client gives up
    /// [default: 10].
    #[arg(long, env = "TETHER_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Optional TOML configuration file.
    #[arg(long, env = "TETHER_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds to wait after start before sending the greeting.
    #[arg(long, default_value_t = 5, env = "TETHER_GREETING_DELAY")]
    greeting_delay: u64,
}

impl Cli {
    /// Merges config file, command line and defaults into an
    /// [`EndpointConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or no client id
    /// was given anywhere.
    fn to_endpoint_config(&self) -> anyhow::Result<EndpointConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?
                .into_endpoint_config(),
            None => EndpointConfig::default(),
        };

        if let Some(scheme) = &self.scheme {
            config.scheme = scheme.clone();
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.path {
            config = config.with_path(path);
        }
        let retry = RetryPolicy::new(
            self.max_retries.unwrap_or(config.retry.max_retries),
            self.retry_interval
                .map(Duration::from_secs)
                .unwrap_or(config.retry.retry_interval),
        );
        config = config.with_retry(retry);
        if let Some(client_id) = &self.client_id {
            config = config.with_client_id(client_id);
        }

        if config.client_id().map_or(true, |id| id.trim().is_empty()) {
            bail!("a client id is required: pass --client-id or set endpoint.client_id");
        }
        Ok(config)
    }
}

// ── Session event logging ─────────────────────────────────────────────────────

/// Logs every session event.
struct LoggingHandler {
    client_id: String,
}

impl SessionHandler for LoggingHandler {
    fn on_start(&self) {
        info!(client_id = %self.client_id, "client started");
    }

    fn on_stop(&self) {
        info!(client_id = %self.client_id, "client stopped");
    }

    fn on_connect(&self) {
        info!(client_id = %self.client_id, "connected to server");
    }

    fn on_disconnect(&self, error: &SessionError) {
        warn!(client_id = %self.client_id, "disconnected from server: {error}");
    }

    fn on_message(&self, message: &[u8]) {
        info!(
            client_id = %self.client_id,
            "received message: {}",
            String::from_utf8_lossy(message)
        );
    }

    fn on_error(&self, error: &SessionError) {
        error!(client_id = %self.client_id, "session error: {error}");
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
    let config = cli.to_endpoint_config()?;
    let client_id = config.client_id().unwrap_or_default().to_string();
    let greeting_delay = Duration::from_secs(cli.greeting_delay);

    info!(
        "tether client starting: url={}, client_id={client_id}",
        config.url()
    );

    let session = ClientSession::new(
        config,
        Arc::new(TungsteniteConnector::new()),
        Arc::new(LoggingHandler {
            client_id: client_id.clone(),
        }),
    );
    let mut states = session.subscribe_state();
    session.start();

    let greeter = {
        let session = session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(greeting_delay).await;
            let greeting = format!("Hello from Client {client_id}");
            match session.send(&greeting).await {
                Ok(()) => info!("sent greeting"),
                Err(e) => warn!("failed to send greeting: {e}"),
            }
        })
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("received Ctrl+C, shutting down");
        }
        _ = states.wait_for(|state| *state == SessionState::Stopped) => {
            warn!("session gave up reconnecting");
        }
    }

    greeter.abort();
    session.stop().await;
    info!("tether client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
