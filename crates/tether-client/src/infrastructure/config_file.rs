//! Optional TOML configuration for the client binary.
//!
//! Every field may be omitted; missing values fall back to the same defaults
//! as [`EndpointConfig::default`].  Example:
//!
//! ```toml
//! [endpoint]
//! host = "relay.example.com"
//! port = 443
//! scheme = "wss"
//! client_id = "kiosk-7"
//! read_timeout_secs = 30
//!
//! [retry]
//! max_retries = 20
//! retry_interval_secs = 2
//!
//! [headers]
//! X-Site = "lobby"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tether_core::DEFAULT_MAX_MESSAGE_SIZE;
use thiserror::Error;

use crate::domain::{EndpointConfig, RetryPolicy};

/// Error type for configuration file loading.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// Top-level client configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClientFileConfig {
    #[serde(default)]
    pub endpoint: EndpointSection,
    #[serde(default)]
    pub retry: RetrySection,
    /// Extra upgrade headers.  `Client-Id` may also be given here.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Where to connect and how long each step may take.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EndpointSection {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_max_read_message_size")]
    pub max_read_message_size: usize,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

/// Reconnect budget.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_scheme() -> String {
    "ws".to_string()
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_path() -> String {
    "/ws".to_string()
}
fn default_max_read_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}
fn default_read_timeout_secs() -> u64 {
    60
}
fn default_write_timeout_secs() -> u64 {
    10
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    10
}
fn default_retry_interval_secs() -> u64 {
    5
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            path: default_path(),
            client_id: None,
            max_read_message_size: default_max_read_message_size(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl ClientFileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigFileError::Parse`] for malformed TOML or unknown keys.
    pub fn parse(content: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(content)?)
    }

    /// Converts the file contents into an [`EndpointConfig`].
    ///
    /// `endpoint.client_id`, when present, wins over a `Client-Id` entry in
    /// `[headers]`.
    pub fn into_endpoint_config(self) -> EndpointConfig {
        let endpoint = self.endpoint;
        let mut config = EndpointConfig::new(
            &endpoint.scheme,
            &endpoint.host,
            endpoint.port,
            &endpoint.path,
        )
        .with_max_read_message_size(endpoint.max_read_message_size)
        .with_read_timeout(Duration::from_secs(endpoint.read_timeout_secs))
        .with_write_timeout(Duration::from_secs(endpoint.write_timeout_secs))
        .with_handshake_timeout(Duration::from_secs(endpoint.handshake_timeout_secs))
        .with_retry(RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_secs(self.retry.retry_interval_secs),
        ));

        for (name, value) in &self.headers {
            config = config.with_header(name, value);
        }
        if let Some(client_id) = endpoint.client_id {
            config = config.with_client_id(&client_id);
        }
        config
    }
}

/// Reads and parses the configuration file at `path`.
///
/// Unlike a settings store, an explicitly named file must exist.
///
/// # Errors
///
/// [`ConfigFileError::Io`] if the file cannot be read,
/// [`ConfigFileError::Parse`] if it is not valid.
pub fn load_config(path: &Path) -> Result<ClientFileConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ClientFileConfig::parse(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
