//! Client-side error types.

use std::time::Duration;

use tether_core::{ReadError, WriteError};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// A single dial attempt failed.
#[derive(Debug, Error)]
pub enum DialError {
    /// The endpoint did not form a valid WebSocket request.
    #[error("invalid endpoint {url}: {source}")]
    InvalidRequest {
        url: String,
        #[source]
        source: WsError,
    },

    /// A configured handshake header has an illegal name or value.
    #[error("invalid handshake header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// TCP connect plus upgrade did not finish in time.
    #[error("handshake with {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    /// The server refused the upgrade or the transport failed during it.
    #[error("handshake with {url} failed: {source}")]
    Handshake {
        url: String,
        #[source]
        source: WsError,
    },
}

/// Everything a [`ClientSession`](crate::ClientSession) reports, either to a
/// [`SessionHandler`](crate::SessionHandler) or as a returned `Err`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A connection attempt failed; the session will retry.
    #[error("dial failed: {0}")]
    Dial(#[from] DialError),

    /// The live connection was lost; the session will reconnect.
    #[error("connection lost: {0}")]
    Read(#[from] ReadError),

    /// A frame (application payload or keepalive ping) could not be written.
    #[error("write failed: {0}")]
    Write(#[from] WriteError),

    /// Every retry failed; the session has stopped.
    #[error("max retries exceeded: {max_retries}")]
    RetriesExhausted { max_retries: u32 },

    /// `send` was called while no connection was installed.
    #[error("websocket client: not connected")]
    NotConnected,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
