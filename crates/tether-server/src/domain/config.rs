//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for the server's runtime
//! settings.  It is a plain struct: the binary fills it from CLI arguments or
//! a TOML file, tests build it directly.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tether_core::{
    ConnectionTimeouts, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};

/// Origin pattern that admits every origin.
pub const ANY_ORIGIN: &str = "*";

/// All runtime configuration for the WebSocket server.
///
/// # Example
///
/// ```rust
/// use tether_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8080);
/// assert_eq!(cfg.path, "/ws");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_addr: SocketAddr,

    /// Only upgrade requests for this path are accepted; others get 404.
    pub path: String,

    /// Browser origins allowed to connect.  `"*"` allows every origin.
    ///
    /// Requests without an `Origin` header (native clients) are always
    /// allowed; only browsers send one.
    pub allowed_origins: Vec<String>,

    /// Handshake header carrying the client id.
    pub client_id_header: String,

    /// When the header is absent: `true` assigns a random UUID, `false`
    /// rejects the upgrade with 400.
    pub assign_missing_ids: bool,

    /// Largest inbound message accepted before the connection is failed.
    pub max_read_message_size: usize,

    /// Silence tolerated on a connection before it is dropped.
    pub read_timeout: Duration,

    /// Upper bound on writing one frame to a client.
    pub write_timeout: Duration,

    /// Upper bound on a client's WebSocket upgrade.
    pub handshake_timeout: Duration,
}

impl ServerConfig {
    /// Read and write deadlines for accepted connections.
    pub fn timeouts(&self) -> ConnectionTimeouts {
        ConnectionTimeouts::new(self.read_timeout, self.write_timeout)
    }

    /// Whether a request carrying `origin` may connect.
    pub fn allows_origin(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == ANY_ORIGIN || allowed.eq_ignore_ascii_case(origin))
    }
}

impl Default for ServerConfig {
    /// Returns a configuration suitable for local development.
    ///
    /// | Field                 | Default          |
    /// |-----------------------|------------------|
    /// | bind_addr             | `127.0.0.1:8080` |
    /// | path                  | `/ws`            |
    /// | allowed_origins       | `["*"]`          |
    /// | client_id_header      | `Client-Id`      |
    /// | assign_missing_ids    | `true`           |
    /// | max_read_message_size | 10 MiB           |
    /// | read_timeout          | 60 s             |
    /// | write_timeout         | 10 s             |
    /// | handshake_timeout     | 10 s             |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            path: "/ws".to_string(),
            allowed_origins: vec![ANY_ORIGIN.to_string()],
            client_id_header: "Client-Id".to_string(),
            assign_missing_ids: true,
            max_read_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
