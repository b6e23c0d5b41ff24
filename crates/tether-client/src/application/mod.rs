//! Application layer for the client.
//!
//! - [`connector`] – the [`Connector`] port: "dial and hand me a connection".
//! - [`handler`] – [`SessionHandler`]: callbacks for lifecycle events.
//! - [`session`] – [`ClientSession`]: the reconnecting state machine.

pub mod connector;
pub mod handler;
pub mod session;

pub use connector::Connector;
pub use handler::{NoopHandler, SessionHandler};
pub use session::ClientSession;
