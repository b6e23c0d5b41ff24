//! Server callbacks.

use crate::error::ServerError;

/// Receives every event of a [`WsServer`](crate::WsServer).
///
/// All methods default to no-ops.  They run on the accept loop, on
/// per-connection tasks, or on the task calling `broadcast`, so keep them
/// short and never call `shutdown()` from inside one.
#[cfg_attr(test, mockall::automock)]
pub trait ServerHandler: Send + Sync {
    /// The accept loop is running.
    fn on_start(&self) {}

    /// `shutdown()` finished draining every connection.  Fires once.
    fn on_stop(&self) {}

    /// A client completed the handshake and is registered.
    fn on_connect(&self, _client_id: &str) {}

    /// A registered client's connection ended.  Not fired for connections
    /// closed by `shutdown()`.
    fn on_disconnect(&self, _client_id: &str, _error: &ServerError) {}

    /// One inbound message from `client_id`, as raw frame bytes.
    fn on_message(&self, _client_id: &str, _message: &[u8]) {}

    /// A handshake, accept or broadcast delivery failed.
    fn on_error(&self, _error: &ServerError) {}
}

/// A handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ServerHandler for NoopHandler {}
