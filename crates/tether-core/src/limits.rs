//! Timeouts, size limits and close-frame constants shared by client and server.

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Largest inbound message accepted by default (10 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How long a connection may stay silent (no pong) before it is considered dead.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound on a single frame write, including keepalive pings.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the WebSocket upgrade handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reason text carried by the close frame sent on graceful shutdown.
pub const NORMAL_CLOSE_REASON: &str = "shutting down normally";

/// Read and write deadlines applied to one [`ConnectionHandle`](crate::ConnectionHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Silence allowed before `read_next` fails with `DeadlineExceeded`.
    ///
    /// Refreshed to `now + read` every time a pong (or a peer ping) arrives.
    pub read: Duration,
    /// Maximum time a single frame write may take.
    pub write: Duration,
}

impl ConnectionTimeouts {
    /// Creates a timeout pair.
    pub const fn new(read: Duration, write: Duration) -> Self {
        Self { read, write }
    }

    /// The keepalive period that keeps a healthy peer inside the read deadline.
    ///
    /// Pinging at half the read timeout leaves one full period of slack for
    /// the pong to arrive.
    pub fn keepalive_period(&self) -> Duration {
        self.read / 2
    }
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT)
    }
}

/// Builds the tungstenite protocol configuration enforcing `max_message_size`.
///
/// The same limit is applied to single frames so an oversized message is
/// rejected before it is fully buffered.
pub fn websocket_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);
    config
}

// ── Tests ─────────────────────────────────────────────────────────────────────
