//! Client endpoint configuration.
//!
//! [`EndpointConfig`] says where to dial, which headers identify this client,
//! how long each network step may take, and how many times to retry.  Build
//! it once (from CLI arguments, a TOML file, or the defaults), then hand it to
//! a [`ClientSession`](crate::ClientSession), which never mutates it.

use std::time::Duration;

use tether_core::{
    ConnectionTimeouts, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};

/// Header that carries the client identity during the upgrade handshake.
pub const CLIENT_ID_HEADER: &str = "Client-Id";

/// Bounded linear backoff.
///
/// After the `k`-th consecutive failed dial the session waits
/// `k * retry_interval` before dialing again, and gives up once `k` reaches
/// `max_retries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed dials tolerated before the session stops.
    pub max_retries: u32,
    /// Base unit of the linear backoff.
    pub retry_interval: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    pub const fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval,
        }
    }

    /// Wait before the next dial after `retry_count` consecutive failures.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.retry_interval.saturating_mul(retry_count)
    }

    /// Returns `true` once `retry_count` failures use up the budget.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

impl Default for RetryPolicy {
    /// 10 retries, 5 seconds apart (growing linearly).
    fn default() -> Self {
        Self::new(10, Duration::from_secs(5))
    }
}

/// Everything a client session needs to reach its server.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tether_client::domain::EndpointConfig;
///
/// let cfg = EndpointConfig::new("ws", "localhost", 8080, "/ws")
///     .with_client_id("alpha")
///     .with_read_timeout(Duration::from_secs(30));
/// assert_eq!(cfg.url(), "ws://localhost:8080/ws");
/// assert_eq!(cfg.client_id(), Some("alpha"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// `ws` or `wss`.
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Upgrade path, always starting with `/`.
    pub path: String,
    /// Extra headers sent with the upgrade request, in order.
    pub headers: Vec<(String, String)>,
    /// Largest inbound message accepted before the connection is failed.
    pub max_read_message_size: usize,
    /// Silence tolerated before the connection counts as dead.
    ///
    /// Keepalive pings go out every `read_timeout / 2`.
    pub read_timeout: Duration,
    /// Upper bound on writing one frame.
    pub write_timeout: Duration,
    /// Upper bound on TCP connect plus WebSocket upgrade.
    pub handshake_timeout: Duration,
    pub retry: RetryPolicy,
}

impl EndpointConfig {
    /// Creates a configuration for `scheme://host:port/path` with default
    /// limits and retry policy and no headers.
    pub fn new(scheme: &str, host: &str, port: u16, path: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            path: normalise_path(path),
            headers: Vec::new(),
            max_read_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// The dial target, `{scheme}://{host}:{port}{path}`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }

    /// The value of the `Client-Id` header, if one is configured.
    pub fn client_id(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CLIENT_ID_HEADER))
            .map(|(_, value)| value.as_str())
    }

    /// Read and write deadlines for connections dialed with this config.
    pub fn timeouts(&self) -> ConnectionTimeouts {
        ConnectionTimeouts::new(self.read_timeout, self.write_timeout)
    }

    /// Sets (or replaces) the `Client-Id` header.
    pub fn with_client_id(self, client_id: &str) -> Self {
        self.with_header(CLIENT_ID_HEADER, client_id)
    }

    /// Adds a handshake header, replacing any header with the same name.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replaces the upgrade path, adding a leading `/` if it is missing.
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = normalise_path(path);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_read_message_size(mut self, bytes: usize) -> Self {
        self.max_read_message_size = bytes;
        self
    }
}

fn normalise_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

impl Default for EndpointConfig {
    /// `ws://localhost:8080/ws`, no headers.
    ///
    /// | Field                 | Default  |
    /// |-----------------------|----------|
    /// | max_read_message_size | 10 MiB   |
    /// | read_timeout          | 60 s     |
    /// | write_timeout         | 10 s     |
    /// | handshake_timeout     | 10 s     |
    /// | retry                 | 10 × 5 s |
    fn default() -> Self {
        Self::new("ws", "localhost", 8080, "/ws")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
