//! The client session state machine.

use std::fmt;

/// Where a [`ClientSession`](crate::ClientSession) is in its lifecycle.
///
/// ```text
///            start                dial ok
///   Idle ───────────▶ Connecting ─────────▶ Connected
///                       ▲    │                  │
///              backoff  │    │ dial failed      │ read failed
///                       │    ▼                  │
///                      Retrying ◀───────────────┘
///                          │
///                          │ retries exhausted   (stop() from anywhere)
///                          ▼
///                       Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed, `start()` not yet called.
    Idle,
    /// A dial attempt is in progress.
    Connecting,
    /// A connection is installed and being read.
    Connected,
    /// Between a failure and the next dial.
    Retrying,
    /// No task is running.  Reached by `stop()` or by exhausting retries.
    Stopped,
}

impl SessionState {
    /// Whether the run task may move from `self` to `next`.
    ///
    /// `Stopped` is left only through `start()`, which checks
    /// [`accepts_start`](Self::accepts_start) instead.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Retrying)
                | (Connected, Retrying)
                | (Retrying, Connecting)
                | (Idle | Connecting | Connected | Retrying, Stopped)
        )
    }

    /// States from which `start()` may launch a run task.
    pub fn accepts_start(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Retrying => "retrying",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
