//! # tether-core
//!
//! Shared foundation for the tether WebSocket session layer.  Both the
//! reconnecting client (`tether-client`) and the connection-tracking server
//! (`tether-server`) are built on the types in this crate.
//!
//! # Architecture overview (for beginners)
//!
//! A WebSocket connection is long-lived and full-duplex: one task reads
//! frames while other tasks (application senders, the keepalive timer) write
//! frames.  Two writers must never interleave their bytes on the wire, and a
//! task blocked waiting for the next frame must be released promptly when we
//! decide to close the connection.
//!
//! This crate packages those rules into a single type:
//!
//! - **`connection`** – [`ConnectionHandle`] wraps one live connection.  It
//!   owns a write lock that serialises every outbound frame (messages, pings,
//!   close), a read deadline refreshed by keepalive pongs, and an idempotent
//!   `close()` that also unblocks a pending `read_next()`.
//!
//! - **`limits`** – Default timeouts, message size limits and close-frame
//!   constants shared by both ends.
//!
//! - **`error`** – The read/write failure taxonomy.  [`ReadError::ClosedLocally`]
//!   is the distinguished case "the read failed because *we* closed the
//!   connection", which callers use to avoid reporting their own shutdown as
//!   a disconnect.
//!
//! The WebSocket protocol itself (handshake, masking, control frames) is
//! delegated to `tokio-tungstenite`.

pub mod connection;
pub mod error;
pub mod limits;

// Re-export the most-used types at the crate root so callers can write
// `tether_core::ConnectionHandle` instead of the full module path.
pub use connection::{ConnectionHandle, FrameSink, FrameSource};
pub use error::{ReadError, WriteError};
pub use limits::{
    websocket_config, ConnectionTimeouts, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_MESSAGE_SIZE,
    DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT, NORMAL_CLOSE_REASON,
};
