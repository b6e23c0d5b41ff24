//! Read and write failures of a single [`ConnectionHandle`](crate::ConnectionHandle).

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// A frame could not be written.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The handle was already closed; nothing was written.
    #[error("connection is closed")]
    Closed,

    /// The write did not complete within the write deadline.
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    /// The payload could not be serialised to JSON.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport reported an error while writing.
    #[error("transport write failed: {0}")]
    Transport(#[source] WsError),
}

/// The read side of a connection terminated.
///
/// Every variant ends the connection; none of them is retried on the same
/// handle.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The handle was closed locally while (or before) reading.
    ///
    /// This is the outcome of our own `close()` and must not be reported to
    /// users as a disconnect.
    #[error("connection closed locally")]
    ClosedLocally,

    /// No pong (or other liveness proof) arrived within the read timeout.
    #[error("no keepalive response within {0:?}")]
    DeadlineExceeded(Duration),

    /// The peer sent a close frame.
    #[error("peer closed the connection (code {code:?}): {reason}")]
    PeerClosed {
        /// Close code, when the peer supplied one.
        code: Option<u16>,
        /// Close reason text (may be empty).
        reason: String,
    },

    /// The underlying stream ended without a close frame.
    #[error("connection ended without a close frame")]
    Eof,

    /// The transport reported a protocol or I/O error.
    #[error("transport read failed: {0}")]
    Transport(#[source] WsError),
}

impl ReadError {
    /// Returns `true` when the failure was caused by our own `close()`.
    pub fn is_local_close(&self) -> bool {
        matches!(self, Self::ClosedLocally)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
