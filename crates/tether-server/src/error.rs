//! Server-side error types.

use std::net::SocketAddr;
use std::time::Duration;

use tether_core::{ReadError, WriteError};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// The WebSocket upgrade of one inbound connection did not complete.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// We refused the upgrade with an HTTP error status.
    #[error("upgrade rejected with HTTP {status}: {reason}")]
    Rejected { status: u16, reason: String },

    /// The peer did not finish the upgrade in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The peer sent something that is not a valid upgrade request.
    #[error("handshake failed: {0}")]
    Protocol(#[source] WsError),
}

/// Registry lookups and deliveries.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No connection is registered under this id.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// A connection is already registered under this id.
    #[error("client id already connected: {0}")]
    DuplicateClient(String),

    /// The client's connection rejected the frame.
    #[error("delivery to {client_id} failed: {source}")]
    Delivery {
        client_id: String,
        #[source]
        source: WriteError,
    },

    /// The payload could not be serialised to JSON.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything a [`WsServer`](crate::WsServer) reports.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// `accept()` failed; the loop keeps accepting.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// One connection failed its upgrade.
    #[error("handshake with {peer} failed: {source}")]
    Handshake {
        peer: SocketAddr,
        #[source]
        source: HandshakeError,
    },

    /// A registered client's connection ended.
    #[error("connection of {client_id} ended: {source}")]
    Read {
        client_id: String,
        #[source]
        source: ReadError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
