//! Optional TOML configuration for the server binary.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:9000"
//! path = "/socket"
//! allowed_origins = ["https://app.example"]
//! assign_missing_ids = false
//! read_timeout_secs = 30
//! ```
//!
//! Missing fields use the same defaults as [`ServerConfig::default`].

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tether_core::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
use thiserror::Error;

use crate::domain::ServerConfig;

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

    /// A field parsed but holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Top-level server configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub server: ServerSection,
}

/// Listener, upgrade and connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_client_id_header")]
    pub client_id_header: String,
    #[serde(default = "default_true")]
    pub assign_missing_ids: bool,
    #[serde(default = "default_max_read_message_size")]
    pub max_read_message_size: usize,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_path() -> String {
    "/ws".to_string()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_client_id_header() -> String {
    "Client-Id".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_read_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}
fn default_read_timeout_secs() -> u64 {
    DEFAULT_READ_TIMEOUT.as_secs()
}
fn default_write_timeout_secs() -> u64 {
    DEFAULT_WRITE_TIMEOUT.as_secs()
}
fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_secs()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_path(),
            allowed_origins: default_allowed_origins(),
            client_id_header: default_client_id_header(),
            assign_missing_ids: default_true(),
            max_read_message_size: default_max_read_message_size(),
            read_timeout_secs: default_read_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl ServerFileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigFileError::Parse`] for malformed TOML or unknown keys.
    pub fn parse(content: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(content)?)
    }

    /// Converts the file contents into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// [`ConfigFileError::InvalidValue`] if `bind` is not a socket address or
    /// `path` does not start with `/`.
    pub fn into_server_config(self) -> Result<ServerConfig, ConfigFileError> {
        let server = self.server;
        let bind_addr: SocketAddr =
            server
                .bind
                .parse()
                .map_err(|e: std::net::AddrParseError| ConfigFileError::InvalidValue {
                    field: "server.bind",
                    reason: format!("{:?}: {e}", server.bind),
                })?;
        if !server.path.starts_with('/') {
            return Err(ConfigFileError::InvalidValue {
                field: "server.path",
                reason: format!("{:?} must start with '/'", server.path),
            });
        }

        Ok(ServerConfig {
            bind_addr,
            path: server.path,
            allowed_origins: server.allowed_origins,
            client_id_header: server.client_id_header,
            assign_missing_ids: server.assign_missing_ids,
            max_read_message_size: server.max_read_message_size,
            read_timeout: Duration::from_secs(server.read_timeout_secs),
            write_timeout: Duration::from_secs(server.write_timeout_secs),
            handshake_timeout: Duration::from_secs(server.handshake_timeout_secs),
        })
    }
}

/// Reads and parses the configuration file at `path`.
///
/// # Errors
///
/// [`ConfigFileError::Io`] if the file cannot be read,
/// [`ConfigFileError::Parse`] if it is not valid.
pub fn load_config(path: &Path) -> Result<ServerFileConfig, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ServerFileConfig::parse(&content)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_default_config() {
        let cfg = ServerFileConfig::parse("")
            .unwrap()
            .into_server_config()
            .unwrap();

        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_only_given_fields() {
        // Arrange
        let toml = r#"
            [server]
            bind = "0.0.0.0:9000"
            allowed_origins = ["https://app.example"]
            assign_missing_ids = false
        "#;

        // Act
        let cfg = ServerFileConfig::parse(toml)
            .unwrap()
            .into_server_config()
            .unwrap();

        // Assert
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(cfg.allowed_origins, vec!["https://app.example".to_string()]);
        assert!(!cfg.assign_missing_ids);
        assert_eq!(cfg.path, "/ws");
        assert_eq!(cfg.read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let result = ServerFileConfig::parse("[server]\nbind = \"localhost\"\n")
            .unwrap()
            .into_server_config();

        assert!(matches!(
            result,
            Err(ConfigFileError::InvalidValue {
                field: "server.bind",
                ..
            })
        ));
    }

    #[test]
    fn test_relative_path_is_rejected() {
        let result = ServerFileConfig::parse("[server]\npath = \"ws\"\n")
            .unwrap()
            .into_server_config();

        assert!(matches!(
            result,
            Err(ConfigFileError::InvalidValue {
                field: "server.path",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_key_is_a_parse_error() {
        let result = ServerFileConfig::parse("[server]\nport = 1\n");
        assert!(matches!(result, Err(ConfigFileError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let result = load_config(Path::new("/nonexistent/path/that/cannot/exist/server.toml"));
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}
