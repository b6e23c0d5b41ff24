//! tether-client library crate.
//!
//! Keeps one long-lived WebSocket connection to a server alive: dials,
//! reconnects with a bounded linear backoff, pings to prove liveness, and
//! tears everything down on request.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! caller ──start/send/stop──▶ [tether-client]
//!   ├── domain/           Pure types: EndpointConfig, RetryPolicy, SessionState
//!   ├── application/      ClientSession state machine, SessionHandler, Connector port
//!   └── infrastructure/
//!         ├── connector/   Real dialer (tokio-tungstenite)
//!         └── config_file/ Optional TOML configuration
//! ```
//!
//! # For beginners: why a `Connector` trait?
//!
//! The session state machine only needs "give me a connection or an error".
//! Hiding the real network dial behind a trait lets the unit tests script
//! exact sequences of failures and successes, and lets them run on tokio's
//! paused clock so a backoff of several seconds completes instantly.

/// Error types surfaced to callers and handlers.
pub mod error;

/// Domain layer: endpoint configuration and session states (no I/O).
pub mod domain;

/// Application layer: the reconnecting session and its callbacks.
pub mod application;

/// Infrastructure layer: WebSocket dialer and configuration file loader.
pub mod infrastructure;

pub use application::{ClientSession, Connector, SessionHandler};
pub use domain::{EndpointConfig, RetryPolicy, SessionState};
pub use error::{DialError, SessionError};
pub use infrastructure::TungsteniteConnector;
