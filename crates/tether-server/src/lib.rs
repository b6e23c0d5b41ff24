//! tether-server library crate.
//!
//! Accepts WebSocket connections, identifies each client by a handshake
//! header, and lets the application address one client or broadcast to all.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! clients (WebSocket, Client-Id header)
//!         ↕
//! [tether-server]
//!   ├── domain/           Pure types: ServerConfig, client identity rules
//!   ├── application/      ConnectionRegistry, ServerHandler callbacks
//!   └── infrastructure/
//!         ├── handshake/   Upgrade validation (path, origin, identity)
//!         ├── ws_server/   Accept loop, read loops, send/broadcast/shutdown
//!         └── config_file/ Optional TOML configuration
//! ```
//!
//! # Liveness
//!
//! The server does not ping.  Clients ping every `read_timeout / 2`, and every
//! ping they send refreshes the server-side read deadline for that
//! connection, so a client that goes silent is dropped after `read_timeout`.

/// Error types surfaced to callers and handlers.
pub mod error;

/// Domain layer: configuration and identity rules (no I/O).
pub mod domain;

/// Application layer: client registry and callbacks.
pub mod application;

/// Infrastructure layer: handshake, server loop, configuration file.
pub mod infrastructure;

pub use application::{BroadcastReport, ConnectionRegistry, ServerHandler};
pub use domain::ServerConfig;
pub use error::{HandshakeError, RegistryError, ServerError};
pub use infrastructure::WsServer;
