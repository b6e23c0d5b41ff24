//! Infrastructure layer for the server.
//!
//! - [`handshake`] – upgrade validation (path, origin, client id).
//! - [`ws_server`] – [`WsServer`]: accept loop, read loops, send, broadcast,
//!   shutdown.
//! - [`config_file`] – loads a [`ServerConfig`](crate::ServerConfig) from a
//!   TOML file.

pub mod config_file;
pub mod handshake;
pub mod ws_server;

pub use config_file::{load_config, ConfigFileError, ServerFileConfig};
pub use ws_server::WsServer;
