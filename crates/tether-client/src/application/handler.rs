//! Client session callbacks.

use crate::error::SessionError;

/// Receives every lifecycle event of a [`ClientSession`](super::ClientSession).
///
/// All methods default to no-ops, so implement only what you need.
///
/// Callbacks run on the session's own tasks, one at a time per task.  Keep
/// them short, and do not call `start()` or `stop()` on the same session
/// from inside one: `stop()` waits for the very task that is running the
/// callback.
#[cfg_attr(test, mockall::automock)]
pub trait SessionHandler: Send + Sync {
    /// An accepted `start()`.
    fn on_start(&self) {}

    /// `stop()` finished draining every task.  Fires once.
    fn on_stop(&self) {}

    /// A dial succeeded and the connection is installed.
    fn on_connect(&self) {}

    /// An installed connection was lost.  Not fired for losses caused by
    /// `stop()`.
    fn on_disconnect(&self, _error: &SessionError) {}

    /// One inbound message, as the raw frame payload.
    fn on_message(&self, _message: &[u8]) {}

    /// A dial failed, a keepalive ping failed, or retries ran out.
    fn on_error(&self, _error: &SessionError) {}
}

/// A handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}
