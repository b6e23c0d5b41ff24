//! Domain layer for the server.
//!
//! - [`config`] – [`ServerConfig`]: where to listen and what to accept.
//! - [`identity`] – rules for the client id carried by the handshake.

pub mod config;
pub mod identity;

pub use config::ServerConfig;
pub use identity::{resolve_client_id, IdentityError, MAX_CLIENT_ID_LEN};
