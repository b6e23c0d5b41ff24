//! One live WebSocket connection and its transport plumbing.
//!
//! - [`handle`] – [`ConnectionHandle`]: write-serialised sends, keepalive
//!   pings, deadline-bounded reads, idempotent close.
//! - [`mock`] – An in-memory transport double for exercising handles (and
//!   the sessions built on them) without sockets.

pub mod handle;
pub mod mock;

pub use handle::{ConnectionHandle, FrameSink, FrameSource};
