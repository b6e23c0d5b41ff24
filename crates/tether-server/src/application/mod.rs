//! Application layer for the server.
//!
//! - [`handler`] – [`ServerHandler`]: callbacks for server and client events.
//! - [`registry`] – [`ConnectionRegistry`]: client id → live connection.

pub mod handler;
pub mod registry;

pub use handler::{NoopHandler, ServerHandler};
pub use registry::{BroadcastReport, ConnectionRegistry};
